use crate::{
    crm::{FetchError, FetchOutcome, FetchResult},
    domain::Comment,
};

/// Identifies one fetch. Only the most recently issued ticket may update the
/// board; completions for older tickets are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchTicket(u64);

/// User-facing result of a fetch, shown as a blocking notice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Loaded(usize),
    NoComments,
    SessionExpired,
    SettingsIncomplete(String),
    FetchFailed(String),
}

impl Notice {
    pub fn opens_settings(&self) -> bool {
        matches!(self, Notice::SessionExpired | Notice::SettingsIncomplete(_))
    }

    pub fn message(&self) -> String {
        match self {
            Notice::Loaded(count) => format!("Loaded {count} comments."),
            Notice::NoComments => "No comments match the selected dates.".to_owned(),
            Notice::SessionExpired => {
                "Your session has expired. Paste a fresh login token in Settings.".to_owned()
            }
            Notice::SettingsIncomplete(detail) => {
                format!("Complete the API settings before fetching. {detail}")
            }
            Notice::FetchFailed(detail) => format!("Comments could not be fetched: {detail}"),
        }
    }
}

/// Comment list plus the selected entry.
#[derive(Default)]
pub struct CommentBoard {
    comments: Vec<Comment>,
    selected_id: Option<String>,
    generation: u64,
    in_flight: bool,
}

impl CommentBoard {
    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight
    }

    /// Stores the selection without checking it against the collection.
    pub fn select(&mut self, id: impl Into<String>) {
        self.selected_id = Some(id.into());
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected_id.as_deref()
    }

    pub fn selected(&self) -> Option<&Comment> {
        let id = self.selected_id.as_deref()?;
        self.comments.iter().find(|comment| comment.comment_id == id)
    }

    pub fn begin_fetch(&mut self) -> FetchTicket {
        self.generation += 1;
        self.in_flight = true;
        FetchTicket(self.generation)
    }

    /// Applies a finished fetch. Returns `None` when the ticket was superseded.
    pub fn apply(&mut self, ticket: FetchTicket, result: FetchResult) -> Option<Notice> {
        if ticket.0 != self.generation {
            log::debug!(
                "Discarding fetch #{} superseded by #{}",
                ticket.0,
                self.generation
            );
            return None;
        }
        self.in_flight = false;

        let notice = match result {
            Ok(FetchOutcome::Loaded(comments)) => {
                let count = comments.len();
                self.comments = comments;
                Notice::Loaded(count)
            }
            Ok(FetchOutcome::Empty) => {
                self.comments.clear();
                Notice::NoComments
            }
            Err(err) => error_notice(err),
        };
        Some(notice)
    }

    /// Reports a fetch that was refused before it was sent. Any fetch already
    /// in flight keeps its ticket.
    pub fn refuse(&self, err: FetchError) -> Notice {
        error_notice(err)
    }
}

fn error_notice(err: FetchError) -> Notice {
    match err {
        FetchError::SessionExpired(_) => Notice::SessionExpired,
        FetchError::Precondition(_) | FetchError::MissingToken => {
            Notice::SettingsIncomplete(err.to_string())
        }
        err => {
            log::warn!("Comment fetch failed: {err}");
            Notice::FetchFailed(err.to_string())
        }
    }
}

// -----------------------------------------------------------------------------
// Search filtering
// -----------------------------------------------------------------------------

pub struct SearchFilter {
    needle: Option<String>,
}

impl SearchFilter {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let needle = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_lowercase())
        };
        Self { needle }
    }

    pub fn matches(&self, comment: &Comment) -> bool {
        self.matches_any(&[
            &comment.guest_name,
            &comment.comment,
            &comment.group_name,
            &comment.nationality,
            &comment.source_name,
        ])
    }

    fn matches_any(&self, fields: &[&str]) -> bool {
        match &self.needle {
            None => true,
            Some(needle) => fields
                .iter()
                .any(|field| field.to_lowercase().contains(needle)),
        }
    }
}
