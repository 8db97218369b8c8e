use std::{
    path::PathBuf,
    sync::{
        Arc,
        mpsc::{self, Receiver, TryRecvError},
    },
    thread,
    time::Duration,
};

use chrono::{Local, NaiveDate, Utc};
use eframe::{
    App, Frame,
    egui::{self, Color32, Context, RichText},
};
use egui_extras::{Column, TableBuilder};

use crate::{
    agenda::{AgendaError, AgendaStore, FirestoreAgendaStore, FirestoreConfig, MemoryAgendaStore},
    board::{CommentBoard, FetchTicket, Notice, SearchFilter},
    crm::{self, FetchError, FetchRequest, FetchResult},
    domain::{AgendaRecord, Comment, DateRange, GroupTone, Settings, TargetLanguage, display_date},
    letter::{AssistantConfig, LetterAssistant, LetterError},
    printout,
    settings::{
        FileSettingsStore, LaunchLocation, MemorySettingsStore, SettingsRepository,
        apply_token_from_location,
    },
};

pub const APP_NAME: &str = "Guest Letter Desk";

const DATE_INPUT_FORMAT: &str = "%Y-%m-%d";

pub struct GuestLetterApp {
    settings_repo: Box<dyn SettingsRepository>,
    storage_dir: Option<PathBuf>,
    storage_warning: Option<String>,
    settings_form: Option<SettingsForm>,
    range_form: RangeForm,
    board: CommentBoard,
    fetch_jobs: Vec<(FetchTicket, PendingJob<FetchResult>)>,
    search_query: String,
    status_line: Option<String>,
    notice: Option<Notice>,
    assistant: Option<LetterAssistant>,
    assistant_warning: Option<String>,
    agenda_store: Arc<dyn AgendaStore>,
    detail: DetailState,
}

impl GuestLetterApp {
    pub fn new(launch: Option<LaunchLocation>) -> Self {
        let (settings_repo, storage_dir, mut storage_warning): (
            Box<dyn SettingsRepository>,
            _,
            _,
        ) = match FileSettingsStore::initialize() {
            Ok(store) => {
                let dir = store.dir().to_path_buf();
                (Box::new(store), Some(dir), None)
            }
            Err(err) => (
                Box::new(MemorySettingsStore::default()),
                None,
                Some(format!(
                    "Settings storage is unavailable; changes last until the app closes ({err})."
                )),
            ),
        };

        if let Some(mut location) = launch
            && let Err(err) = apply_token_from_location(settings_repo.as_ref(), &mut location)
        {
            storage_warning = Some(format!("Could not store the login token from the link: {err}"));
        }

        let (assistant, assistant_warning) =
            match AssistantConfig::from_env().and_then(|config| LetterAssistant::from_config(&config)) {
                Ok(assistant) => (Some(assistant), None),
                Err(err) => {
                    log::warn!("Letter assistant disabled: {err}");
                    (None, Some(err.to_string()))
                }
            };

        let agenda_store: Arc<dyn AgendaStore> = match FirestoreConfig::from_env() {
            Some(config) => match FirestoreAgendaStore::new(&config) {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    log::warn!("Falling back to in-memory agendas: {err}");
                    Arc::new(MemoryAgendaStore::default())
                }
            },
            None => {
                log::info!("FIRESTORE_PROJECT_ID not set; agendas are kept in memory");
                Arc::new(MemoryAgendaStore::default())
            }
        };

        let mut app = Self {
            settings_repo,
            storage_dir,
            storage_warning,
            settings_form: None,
            range_form: RangeForm::new(DateRange::last_month()),
            board: CommentBoard::default(),
            fetch_jobs: Vec::new(),
            search_query: String::new(),
            status_line: None,
            notice: None,
            assistant,
            assistant_warning,
            agenda_store,
            detail: DetailState::default(),
        };

        let settings = app.settings_repo.load();
        let raw_token = app.settings_repo.raw_token();
        if FetchRequest::prepare(&settings, raw_token.as_deref(), app.range_form.range).is_ok() {
            app.start_fetch();
        } else {
            app.open_settings(None);
        }

        app
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    fn open_settings(&mut self, reason: Option<String>) {
        self.settings_form = Some(SettingsForm {
            draft: self.settings_repo.load(),
            reason,
            error: None,
        });
    }

    fn save_settings(&mut self) {
        let Some(form) = &mut self.settings_form else {
            return;
        };
        match self.settings_repo.save(&form.draft) {
            Ok(()) => {
                self.settings_form = None;
                self.status_line = Some("Settings saved.".to_owned());
            }
            Err(err) => form.error = Some(format!("Unable to save settings: {err}")),
        }
    }

    // -------------------------------------------------------------------------
    // Fetching
    // -------------------------------------------------------------------------

    fn start_fetch(&mut self) {
        let range = match self.range_form.parse() {
            Ok(range) => range,
            Err(message) => {
                self.range_form.error = Some(message);
                return;
            }
        };
        self.range_form.error = None;

        let settings = self.settings_repo.load();
        let raw_token = self.settings_repo.raw_token();
        match FetchRequest::prepare(&settings, raw_token.as_deref(), range) {
            Ok(request) => {
                let ticket = self.board.begin_fetch();
                let job = PendingJob::spawn(move || -> FetchResult {
                    let client = crm::build_client()?;
                    crm::fetch_comments(&client, &request)
                });
                self.fetch_jobs.push((ticket, job));
            }
            Err(err) => {
                let notice = self.board.refuse(err);
                self.show_notice(notice);
            }
        }
    }

    fn poll_fetches(&mut self) {
        let mut finished = Vec::new();
        self.fetch_jobs
            .retain(|(ticket, job)| match job.try_take(|| Err(FetchError::BackgroundWorkerGone)) {
                None => true,
                Some(result) => {
                    finished.push((*ticket, result));
                    false
                }
            });

        for (ticket, result) in finished {
            if let Some(notice) = self.board.apply(ticket, result) {
                self.show_notice(notice);
            }
        }
    }

    fn show_notice(&mut self, notice: Notice) {
        if let Notice::Loaded(count) = notice {
            self.status_line = Some(format!(
                "Loaded {count} comments at {}.",
                Local::now().format("%H:%M")
            ));
            return;
        }
        if notice.opens_settings() {
            self.open_settings(Some(notice.message()));
        }
        self.status_line = None;
        self.notice = Some(notice);
    }

    // -------------------------------------------------------------------------
    // Detail: selection, letters and agendas
    // -------------------------------------------------------------------------

    fn sync_detail_with_selection(&mut self) {
        let selected = self.board.selected().map(|comment| comment.comment_id.clone());
        if selected == self.detail.comment_id {
            return;
        }

        self.detail = DetailState {
            comment_id: selected.clone(),
            ..DetailState::default()
        };
        if let Some(comment_id) = selected {
            let store = Arc::clone(&self.agenda_store);
            let id = comment_id.clone();
            self.detail.agenda_load = Some(PendingJob::spawn(move || store.fetch(&id)));
        }
    }

    fn start_generate(&mut self, comment: &Comment) {
        let Some(assistant) = self.assistant.clone() else {
            return;
        };
        let comment = comment.clone();
        let notes = self.detail.extra_notes.clone();
        let language = self.detail.target_language;
        self.detail.edited = true;
        self.detail.error = None;
        self.detail.letter.clear();
        self.detail.translation = None;
        self.detail.show_translation = false;
        self.detail.generate =
            Some(PendingJob::spawn(move || assistant.draft(&comment, &notes, language)));
    }

    fn toggle_translation(&mut self) {
        if self.detail.translation.is_some() {
            self.detail.show_translation = !self.detail.show_translation;
            return;
        }
        let Some(assistant) = self.assistant.clone() else {
            return;
        };
        let letter = self.detail.letter.clone();
        self.detail.error = None;
        self.detail.translate = Some(PendingJob::spawn(move || assistant.translate(&letter)));
    }

    fn save_agenda(&mut self) {
        let Some(comment_id) = self.detail.comment_id.clone() else {
            return;
        };
        let record = AgendaRecord {
            extra_notes: self.detail.extra_notes.clone(),
            letter: self.detail.letter.clone(),
            target_language: self.detail.target_language,
            updated_at: Utc::now(),
        };
        let store = Arc::clone(&self.agenda_store);
        self.detail.edited = true;
        self.detail.error = None;
        self.detail.agenda_save = Some(PendingJob::spawn(move || store.store(&comment_id, &record)));
    }

    fn print_letter(&mut self, comment: &Comment) {
        let Some(dir) = &self.storage_dir else {
            self.detail.error = Some("Letters cannot be written without a home directory.".into());
            return;
        };
        let today = Local::now().date_naive();
        match printout::write_printable(dir, comment, self.detail.visible_letter(), today) {
            Ok(path) => self.detail.info = Some(format!("Printable letter saved to {}", path.display())),
            Err(err) => self.detail.error = Some(err.to_string()),
        }
    }

    fn poll_detail_jobs(&mut self) {
        self.detail.poll_jobs();
    }

    fn has_pending_work(&self) -> bool {
        !self.fetch_jobs.is_empty() || self.detail.is_busy()
    }

    // -------------------------------------------------------------------------
    // Rendering
    // -------------------------------------------------------------------------

    fn render_top_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|row| {
            row.heading(APP_NAME);
            row.with_layout(egui::Layout::right_to_left(egui::Align::Center), |lane| {
                if lane.button("API settings").clicked() {
                    self.open_settings(None);
                }
                if let Some(status) = &self.status_line {
                    lane.weak(status.as_str());
                }
            });
        });
    }

    fn render_side_panel(&mut self, ui: &mut egui::Ui) {
        if let Some(warning) = &self.storage_warning {
            ui.colored_label(ui.visuals().warn_fg_color, warning);
            ui.separator();
        }

        ui.horizontal(|row| {
            row.label("From");
            row.add(egui::TextEdit::singleline(&mut self.range_form.start).desired_width(90.0));
            row.label("to");
            row.add(egui::TextEdit::singleline(&mut self.range_form.end).desired_width(90.0));
        });
        ui.horizontal(|row| {
            let label = if self.board.is_fetching() {
                "Fetching…"
            } else {
                "Fetch comments"
            };
            if row.button(label).clicked() {
                self.start_fetch();
            }
        });
        if let Some(error) = &self.range_form.error {
            ui.colored_label(ui.visuals().error_fg_color, error);
        }

        ui.separator();
        ui.add(
            egui::TextEdit::singleline(&mut self.search_query)
                .hint_text("Search…")
                .desired_width(f32::INFINITY),
        );
        ui.add_space(4.0);

        let filter = SearchFilter::new(&self.search_query);
        let selected_id = self.board.selected_id().map(str::to_owned);
        let rows: Vec<&Comment> = self
            .board
            .comments()
            .iter()
            .filter(|comment| filter.matches(comment))
            .collect();

        if rows.is_empty() {
            ui.weak(if self.board.comments().is_empty() {
                "No comments loaded."
            } else {
                "No matches for current search."
            });
            return;
        }

        let clicked = draw_comment_table(ui, &rows, selected_id.as_deref());
        if let Some(id) = clicked {
            self.board.select(id);
        }
    }

    fn render_detail(&mut self, ui: &mut egui::Ui) {
        self.sync_detail_with_selection();
        let Some(comment) = self.board.selected().cloned() else {
            ui.centered_and_justified(|center| {
                center.label("Select a comment on the left to see its details.");
            });
            return;
        };

        egui::ScrollArea::vertical().show(ui, |area| {
            render_comment_card(area, &comment);
            area.add_space(12.0);
            let loading = self.detail.agenda_load.is_some();
            if loading {
                area.weak("Loading saved draft…");
            }
            area.add_enabled_ui(!loading, |controls| {
                self.render_letter_controls(controls, &comment);
            });
        });
    }

    fn render_letter_controls(&mut self, ui: &mut egui::Ui, comment: &Comment) {
        ui.label("Extra notes for the letter");
        let notes = ui.add(
            egui::TextEdit::multiline(&mut self.detail.extra_notes)
                .hint_text("e.g. mention the fruit basket sent to the room")
                .desired_rows(3)
                .desired_width(f32::INFINITY),
        );
        if notes.changed() {
            self.detail.edited = true;
        }
        ui.add_space(8.0);

        if let Some(warning) = &self.assistant_warning {
            ui.colored_label(ui.visuals().warn_fg_color, warning);
        }

        let mut generate = false;
        let language_before = self.detail.target_language;
        ui.horizontal(|row| {
            row.label("Target language");
            egui::ComboBox::from_id_salt("target_language")
                .selected_text(self.detail.target_language.label())
                .show_ui(row, |combo| {
                    for language in TargetLanguage::ALL {
                        combo.selectable_value(
                            &mut self.detail.target_language,
                            language,
                            language.label(),
                        );
                    }
                });
            let busy = self.detail.generate.is_some();
            let enabled = self.assistant.is_some() && !busy;
            let label = if busy { "Generating…" } else { "Generate letter" };
            generate = row.add_enabled(enabled, egui::Button::new(label)).clicked();
        });
        if self.detail.target_language != language_before {
            self.detail.edited = true;
        }
        if generate {
            self.start_generate(comment);
        }

        if let Some(error) = &self.detail.error {
            ui.colored_label(ui.visuals().error_fg_color, error);
        } else if let Some(info) = &self.detail.info {
            ui.weak(info.as_str());
        }

        if self.detail.letter.is_empty() {
            return;
        }

        ui.separator();
        ui.group(|group| {
            group.set_width(group.available_width());
            group.label(RichText::new(self.detail.visible_letter()).size(15.0));
        });

        let mut translate = false;
        let mut save = false;
        let mut print = false;
        ui.horizontal(|row| {
            let translate_label = if self.detail.translate.is_some() {
                "Translating…".to_owned()
            } else if self.detail.show_translation {
                "Show original".to_owned()
            } else {
                self.assistant
                    .as_ref()
                    .map(|assistant| format!("Show in {}", assistant.staff_language().label()))
                    .unwrap_or_else(|| "Translate".to_owned())
            };
            let can_translate = self.detail.translate.is_none()
                && (self.detail.translation.is_some() || self.assistant.is_some());
            translate = row
                .add_enabled(can_translate, egui::Button::new(translate_label))
                .clicked();
            save = row
                .add_enabled(
                    self.detail.agenda_save.is_none(),
                    egui::Button::new("Save draft"),
                )
                .clicked();
            print = row.button("Print").clicked();
        });
        if translate {
            self.toggle_translation();
        }
        if save {
            self.save_agenda();
        }
        if print {
            self.print_letter(comment);
        }
    }

    fn render_settings_window(&mut self, ctx: &Context) {
        let Some(form) = &mut self.settings_form else {
            return;
        };

        let mut open = true;
        let mut save = false;
        egui::Window::new("API connection settings")
            .collapsible(false)
            .resizable(false)
            .open(&mut open)
            .show(ctx, |ui| {
                if let Some(reason) = &form.reason {
                    ui.colored_label(ui.visuals().warn_fg_color, reason);
                    ui.separator();
                }
                egui::Grid::new("settings_grid")
                    .num_columns(2)
                    .spacing([12.0, 6.0])
                    .show(ui, |grid| {
                        grid.label("Base URL");
                        grid.add(
                            egui::TextEdit::singleline(&mut form.draft.base_url)
                                .hint_text("https://4001.hoteladvisor.net"),
                        );
                        grid.end_row();
                        grid.label("Login token");
                        grid.add(
                            egui::TextEdit::singleline(&mut form.draft.login_token).password(true),
                        );
                        grid.end_row();
                        grid.label("Hotel ID");
                        grid.add(
                            egui::TextEdit::singleline(&mut form.draft.hotel_id).hint_text("21390"),
                        );
                        grid.end_row();
                        grid.label("Action");
                        grid.text_edit_singleline(&mut form.draft.action);
                        grid.end_row();
                        grid.label("Object name");
                        grid.text_edit_singleline(&mut form.draft.object_name);
                        grid.end_row();
                    });
                ui.small(
                    "Open the app through a link carrying ?token=… to fill the login token automatically.",
                );
                if let Some(error) = &form.error {
                    ui.colored_label(ui.visuals().error_fg_color, error);
                }
                ui.separator();
                save = ui.button("Save settings").clicked();
            });

        if save {
            self.save_settings();
        } else if !open {
            self.settings_form = None;
        }
    }

    fn render_notice(&mut self, ctx: &Context) {
        let Some(notice) = &self.notice else {
            return;
        };
        let message = notice.message();
        let response = egui::Modal::new(egui::Id::new("notice_modal")).show(ctx, |ui| {
            ui.set_max_width(360.0);
            ui.label(message);
            ui.add_space(8.0);
            ui.button("OK").clicked()
        });
        if response.inner || response.should_close() {
            self.notice = None;
        }
    }
}

impl App for GuestLetterApp {
    fn update(&mut self, ctx: &Context, _frame: &mut Frame) {
        self.poll_fetches();
        self.poll_detail_jobs();

        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| self.render_top_bar(ui));

        egui::SidePanel::left("comments_panel")
            .default_width(380.0)
            .show(ctx, |ui| self.render_side_panel(ui));

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_detail(ui);
        });

        self.render_settings_window(ctx);
        self.render_notice(ctx);

        let repaint = if self.has_pending_work() { 100 } else { 500 };
        ctx.request_repaint_after(Duration::from_millis(repaint));
    }
}

// -----------------------------------------------------------------------------
// Comment rendering helpers
// -----------------------------------------------------------------------------

fn draw_comment_table(ui: &mut egui::Ui, rows: &[&Comment], selected_id: Option<&str>) -> Option<String> {
    let mut clicked = None;
    TableBuilder::new(ui)
        .striped(true)
        .column(Column::initial(80.0))
        .column(Column::remainder())
        .column(Column::initial(110.0))
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.strong("Date");
            });
            header.col(|ui| {
                ui.strong("Guest");
            });
            header.col(|ui| {
                ui.strong("Group");
            });
        })
        .body(|mut body| {
            for comment in rows {
                let is_selected = selected_id == Some(comment.comment_id.as_str());
                body.row(40.0, |mut row| {
                    row.col(|ui| {
                        ui.label(display_date(&comment.comment_date));
                    });
                    row.col(|ui| {
                        ui.vertical(|cell| {
                            if cell
                                .selectable_label(is_selected, comment.guest_label())
                                .clicked()
                            {
                                clicked = Some(comment.comment_id.clone());
                            }
                            cell.small(format!("{} · {}", comment.nationality, comment.source_name));
                        });
                    });
                    row.col(|ui| {
                        group_badge(ui, &comment.group_name);
                    });
                });
            }
        });
    clicked
}

fn render_comment_card(ui: &mut egui::Ui, comment: &Comment) {
    ui.group(|group| {
        group.set_width(group.available_width());
        group.horizontal_wrapped(|row| {
            row.strong(comment.guest_label());
            row.label(format!("· {}", comment.nationality));
            row.label(format!("· {}", display_date(&comment.comment_date)));
            row.label(format!("· {}", comment.source_name));
            group_badge(row, &comment.group_name);
        });
        if !comment.tags.is_empty() {
            group.horizontal_wrapped(|row| {
                for tag in &comment.tags {
                    group_badge(row, tag);
                }
            });
        }
        render_guest_facts(group, comment);
        group.add_space(6.0);
        group.label(RichText::new("Guest comment").small().weak());
        group.label(RichText::new(&comment.comment).size(16.0));
    });

    ui.add_space(8.0);
    ui.group(|group| {
        group.set_width(group.available_width());
        group.label(
            RichText::new("Action taken")
                .small()
                .color(Color32::from_rgb(5, 150, 105)),
        );
        match &comment.answer {
            Some(answer) => group.label(answer.as_str()),
            None => group.weak("No action recorded yet."),
        };
    });
}

fn render_guest_facts(ui: &mut egui::Ui, comment: &Comment) {
    let stay = match (comment.check_in.is_empty(), comment.check_out.is_empty()) {
        (true, true) => String::new(),
        _ => format!(
            "{} – {}",
            display_date(&comment.check_in),
            display_date(&comment.check_out)
        ),
    };
    let consent = comment.consent().granted().join(", ");
    let facts = [
        ("Room", comment.room_no.as_str()),
        ("Stay", stay.as_str()),
        ("Email", comment.email.as_str()),
        ("Phone", comment.phone.as_str()),
        ("Score", comment.score.as_str()),
        ("Contact consent", consent.as_str()),
    ];
    ui.horizontal_wrapped(|row| {
        for (label, value) in facts.iter().filter(|(_, value)| !value.is_empty()) {
            row.small(format!("{label}: {value}"));
            row.add_space(8.0);
        }
    });
}

fn group_badge(ui: &mut egui::Ui, group_name: &str) {
    if group_name.is_empty() {
        return;
    }
    let color = match GroupTone::classify(group_name) {
        GroupTone::Complaint => Color32::from_rgb(185, 28, 28),
        GroupTone::Praise => Color32::from_rgb(21, 128, 61),
        GroupTone::Suggestion => Color32::from_rgb(29, 78, 216),
        GroupTone::Neutral => ui.visuals().weak_text_color(),
    };
    ui.label(RichText::new(group_name).small().strong().color(color));
}

// -----------------------------------------------------------------------------
// Background jobs
// -----------------------------------------------------------------------------

struct PendingJob<T> {
    receiver: Receiver<T>,
}

impl<T: Send + 'static> PendingJob<T> {
    fn spawn(work: impl FnOnce() -> T + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(work());
        });
        Self { receiver: rx }
    }

    fn try_take(&self, gone: impl FnOnce() -> T) -> Option<T> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(gone()),
        }
    }
}

// -----------------------------------------------------------------------------
// Supporting structs
// -----------------------------------------------------------------------------

struct SettingsForm {
    draft: Settings,
    reason: Option<String>,
    error: Option<String>,
}

struct RangeForm {
    range: DateRange,
    start: String,
    end: String,
    error: Option<String>,
}

impl RangeForm {
    fn new(range: DateRange) -> Self {
        Self {
            range,
            start: range.start.format(DATE_INPUT_FORMAT).to_string(),
            end: range.end.format(DATE_INPUT_FORMAT).to_string(),
            error: None,
        }
    }

    fn parse(&mut self) -> Result<DateRange, String> {
        let parse = |raw: &str, name: &str| {
            NaiveDate::parse_from_str(raw.trim(), DATE_INPUT_FORMAT)
                .map_err(|_| format!("{name} date must look like 2025-06-01"))
        };
        self.range = DateRange {
            start: parse(&self.start, "Start")?,
            end: parse(&self.end, "End")?,
        };
        Ok(self.range)
    }
}

#[derive(Default)]
struct DetailState {
    comment_id: Option<String>,
    // Set once staff change anything for the selected comment.
    edited: bool,
    extra_notes: String,
    target_language: TargetLanguage,
    letter: String,
    translation: Option<String>,
    show_translation: bool,
    info: Option<String>,
    error: Option<String>,
    generate: Option<PendingJob<Result<String, LetterError>>>,
    translate: Option<PendingJob<Result<String, LetterError>>>,
    agenda_load: Option<PendingJob<Result<Option<AgendaRecord>, AgendaError>>>,
    agenda_save: Option<PendingJob<Result<(), AgendaError>>>,
}

impl DetailState {
    fn visible_letter(&self) -> &str {
        match (&self.translation, self.show_translation) {
            (Some(translation), true) => translation,
            _ => &self.letter,
        }
    }

    /// Applies a saved draft unless work on this comment has already begun.
    fn restore(&mut self, record: AgendaRecord) -> bool {
        if self.edited {
            return false;
        }
        self.extra_notes = record.extra_notes;
        self.letter = record.letter;
        self.target_language = record.target_language;
        self.translation = None;
        self.show_translation = false;
        self.info = Some(format!(
            "Draft restored from {}",
            record.updated_at.with_timezone(&Local).format("%d.%m.%Y %H:%M")
        ));
        true
    }

    fn poll_jobs(&mut self) {
        if let Some(job) = &self.agenda_load
            && let Some(result) = job.try_take(|| Err(AgendaError::BackgroundWorkerGone))
        {
            self.agenda_load = None;
            match result {
                Ok(Some(record)) => {
                    if !self.restore(record) {
                        log::info!("Keeping current edits over the saved draft");
                        self.info = Some("A saved draft exists; your current edits were kept.".to_owned());
                    }
                }
                Ok(None) => {}
                Err(err) => self.error = Some(format!("Saved draft could not be loaded: {err}")),
            }
        }

        if let Some(job) = &self.generate
            && let Some(result) = job.try_take(|| Err(LetterError::BackgroundWorkerGone))
        {
            self.generate = None;
            match result {
                Ok(letter) => self.letter = letter,
                Err(err) => self.error = Some(format!("Letter could not be generated: {err}")),
            }
        }

        if let Some(job) = &self.translate
            && let Some(result) = job.try_take(|| Err(LetterError::BackgroundWorkerGone))
        {
            self.translate = None;
            match result {
                Ok(translation) => {
                    self.translation = Some(translation);
                    self.show_translation = true;
                }
                Err(err) => self.error = Some(format!("Translation failed: {err}")),
            }
        }

        if let Some(job) = &self.agenda_save
            && let Some(result) = job.try_take(|| Err(AgendaError::BackgroundWorkerGone))
        {
            self.agenda_save = None;
            match result {
                Ok(()) => self.info = Some("Draft saved.".to_owned()),
                Err(err) => self.error = Some(format!("Draft could not be saved: {err}")),
            }
        }
    }

    fn is_busy(&self) -> bool {
        self.generate.is_some()
            || self.translate.is_some()
            || self.agenda_load.is_some()
            || self.agenda_save.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_form_parses_iso_dates() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 30).expect("date");
        let mut form = RangeForm::new(DateRange::ending_on(today));
        assert_eq!(form.start, "2025-05-30");
        form.start = " 2025-06-01 ".into();
        let range = form.parse().expect("range");
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2025, 6, 1).expect("date"));
        assert_eq!(range.end, today);
    }

    #[test]
    fn range_form_rejects_bad_input() {
        let mut form = RangeForm::new(DateRange::last_month());
        form.end = "30.06.2025".into();
        let err = form.parse().unwrap_err();
        assert!(err.starts_with("End"));
    }

    #[test]
    fn pending_job_delivers_result() {
        let job = PendingJob::spawn(|| 42);
        let mut value = None;
        for _ in 0..200 {
            if let Some(result) = job.try_take(|| -1) {
                value = Some(result);
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(value, Some(42));
    }

    fn saved_record() -> AgendaRecord {
        AgendaRecord {
            extra_notes: "old notes".into(),
            letter: "Old saved letter".into(),
            target_language: TargetLanguage::German,
            updated_at: Utc::now(),
        }
    }

    // The load reads the store immediately but only reports back once released.
    fn held_load(detail: &mut DetailState, store: &Arc<MemoryAgendaStore>) -> mpsc::Sender<()> {
        let (release, gate) = mpsc::channel::<()>();
        let loader = Arc::clone(store);
        detail.agenda_load = Some(PendingJob::spawn(move || {
            let record = loader.fetch("101");
            let _ = gate.recv();
            record
        }));
        release
    }

    fn wait_for_load(detail: &mut DetailState) {
        for _ in 0..200 {
            detail.poll_jobs();
            if detail.agenda_load.is_none() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("saved draft never finished loading");
    }

    #[test]
    fn saved_draft_keeps_edits_made_while_loading() {
        let store = Arc::new(MemoryAgendaStore::default());
        store.store("101", &saved_record()).expect("seed");
        let mut detail = DetailState {
            comment_id: Some("101".into()),
            ..DetailState::default()
        };
        let release = held_load(&mut detail, &store);

        detail.extra_notes = "Fruit basket sent today".into();
        detail.letter = "Freshly generated letter".into();
        detail.edited = true;
        release.send(()).expect("release");
        wait_for_load(&mut detail);

        assert_eq!(detail.extra_notes, "Fruit basket sent today");
        assert_eq!(detail.letter, "Freshly generated letter");
        assert_eq!(detail.target_language, TargetLanguage::English);
        assert!(detail.error.is_none());
    }

    #[test]
    fn saved_draft_replaces_untouched_detail_and_drops_translation() {
        let store = Arc::new(MemoryAgendaStore::default());
        store.store("101", &saved_record()).expect("seed");
        let mut detail = DetailState {
            comment_id: Some("101".into()),
            translation: Some("Eski mektup".into()),
            show_translation: true,
            ..DetailState::default()
        };
        let release = held_load(&mut detail, &store);
        release.send(()).expect("release");
        wait_for_load(&mut detail);

        assert_eq!(detail.extra_notes, "old notes");
        assert_eq!(detail.letter, "Old saved letter");
        assert_eq!(detail.target_language, TargetLanguage::German);
        assert_eq!(detail.translation, None);
        assert_eq!(detail.visible_letter(), "Old saved letter");
    }

    #[test]
    fn visible_letter_follows_translation_toggle() {
        let mut detail = DetailState {
            letter: "Dear guest".into(),
            translation: Some("Sayın misafirimiz".into()),
            ..DetailState::default()
        };
        assert_eq!(detail.visible_letter(), "Dear guest");
        detail.show_translation = true;
        assert_eq!(detail.visible_letter(), "Sayın misafirimiz");
    }
}
