use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{Comment, display_date};

pub const LETTERS_DIR: &str = "letters";

/// Plain-text page for printing a reply letter.
pub fn render_printable(comment: &Comment, letter: &str, printed_on: NaiveDate) -> String {
    let mut page = String::new();
    page.push_str(&format!("Date: {}\n", printed_on.format("%d.%m.%Y")));
    page.push_str(&format!("Guest: {}\n", comment.guest_label()));
    if !comment.nationality.is_empty() {
        page.push_str(&format!("Nationality: {}\n", comment.nationality));
    }
    if !comment.room_no.is_empty() {
        page.push_str(&format!("Room: {}\n", comment.room_no));
    }
    if !comment.comment_date.is_empty() {
        page.push_str(&format!(
            "Feedback of: {}\n",
            display_date(&comment.comment_date)
        ));
    }
    page.push('\n');
    page.push_str(letter.trim());
    page.push('\n');
    page
}

/// Writes the page to `<dir>/letters/<comment id>.txt`, replacing any earlier copy.
pub fn write_printable(
    dir: &Path,
    comment: &Comment,
    letter: &str,
    printed_on: NaiveDate,
) -> Result<PathBuf, PrintError> {
    if letter.trim().is_empty() {
        return Err(PrintError::EmptyLetter);
    }
    let letters_dir = dir.join(LETTERS_DIR);
    fs::create_dir_all(&letters_dir)?;
    let path = letters_dir.join(format!("{}.txt", file_stem(&comment.comment_id)));
    fs::write(&path, render_printable(comment, letter, printed_on))?;
    log::info!("Wrote printable letter to {}", path.display());
    Ok(path)
}

fn file_stem(comment_id: &str) -> String {
    let stem: String = comment_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "letter".to_owned()
    } else {
        stem
    }
}

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("There is no letter to print yet")]
    EmptyLetter,
    #[error("Could not write the printable letter: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment() -> Comment {
        Comment {
            comment_id: "101".into(),
            guest_name: "John Smith".into(),
            nationality: "England".into(),
            comment_date: "2025-06-17 08:00:00".into(),
            ..Comment::default()
        }
    }

    fn june_18() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 18).expect("date")
    }

    #[test]
    fn printable_page_has_header_and_body() {
        let page = render_printable(&comment(), "  Dear Mr. Smith,\n\nThank you.  ", june_18());
        assert!(page.starts_with("Date: 18.06.2025\nGuest: John Smith\nNationality: England\n"));
        assert!(page.contains("Feedback of: 17.06.2025\n"));
        assert!(!page.contains("Room:"));
        assert!(page.ends_with("Dear Mr. Smith,\n\nThank you.\n"));
    }

    #[test]
    fn write_printable_creates_letter_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_printable(dir.path(), &comment(), "Dear guest", june_18()).expect("write");
        assert_eq!(path, dir.path().join(LETTERS_DIR).join("101.txt"));
        let contents = fs::read_to_string(path).expect("read");
        assert!(contents.ends_with("Dear guest\n"));
    }

    #[test]
    fn write_printable_rejects_empty_letter() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = write_printable(dir.path(), &comment(), " ", june_18());
        assert!(matches!(result, Err(PrintError::EmptyLetter)));
    }

    #[test]
    fn file_stem_sanitizes_ids() {
        assert_eq!(file_stem("../x y"), "___x_y");
        assert_eq!(file_stem(""), "letter");
    }
}
