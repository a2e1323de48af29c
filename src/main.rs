use eframe::egui;
use securefill::{Config, DataStore, Record};

const ACCENT: egui::Color32 = egui::Color32::from_rgb(100, 149, 237);

/// Add/edit form state. `editing` holds the id of the record being changed.
#[derive(Default)]
struct RecordForm {
    editing: Option<String>,
    attribute: String,
    value: String,
    description: String,
}

impl RecordForm {
    fn load(&mut self, record: &Record) {
        self.editing = Some(record.id.clone());
        self.attribute = record.attribute.clone();
        self.value = record.value.clone();
        self.description = record.description.clone();
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

struct DataManagerApp {
    store: DataStore,
    form: RecordForm,
    search: String,
    notice: Option<(String, bool)>,
}

impl DataManagerApp {
    fn new(cc: &eframe::CreationContext<'_>, store: DataStore) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());
        Self {
            store,
            form: RecordForm::default(),
            search: String::new(),
            notice: None,
        }
    }

    fn notify(&mut self, text: impl Into<String>, is_error: bool) {
        let text = text.into();
        if is_error {
            tracing::error!("{text}");
        }
        self.notice = Some((text, is_error));
    }

    fn submit(&mut self) {
        let form = &self.form;
        let result = match &form.editing {
            Some(id) => self
                .store
                .update(id, &form.attribute, &form.value, &form.description)
                .map(|_| "Record updated."),
            None => self
                .store
                .add(&form.attribute, &form.value, &form.description)
                .map(|_| "Record added."),
        };
        match result {
            Ok(msg) => {
                self.form.clear();
                self.notify(msg, false);
            }
            Err(e) => self.notify(format!("Could not save: {e}"), true),
        }
    }

    fn render_header(&self, ui: &mut egui::Ui) {
        ui.vertical_centered(|ui| {
            ui.add_space(20.0);
            ui.heading(
                egui::RichText::new("SecureFill Data")
                    .size(32.0)
                    .strong()
                    .color(ACCENT),
            );
            ui.label(
                egui::RichText::new(self.store.path().display().to_string())
                    .small()
                    .color(egui::Color32::GRAY),
            );
            ui.add_space(10.0);
        });
    }

    fn render_dashboard(&self, ui: &mut egui::Ui) {
        let records = self.store.records();
        let described = records.iter().filter(|r| !r.description.is_empty()).count();
        let matching = self.visible_records().len();

        egui::Frame::new()
            .fill(egui::Color32::from_rgb(25, 25, 25))
            .corner_radius(8.0)
            .inner_margin(15.0)
            .show(ui, |ui| {
                ui.columns(3, |cols| {
                    cols[0].heading(
                        egui::RichText::new(records.len().to_string())
                            .size(24.0)
                            .strong(),
                    );
                    cols[0].label("Records");

                    cols[1].heading(
                        egui::RichText::new(described.to_string())
                            .size(24.0)
                            .strong()
                            .color(egui::Color32::GREEN),
                    );
                    cols[1].label("With description");

                    cols[2].heading(
                        egui::RichText::new(matching.to_string())
                            .size(24.0)
                            .strong()
                            .color(ACCENT),
                    );
                    cols[2].label("Shown");
                });
            });
    }

    fn render_form(&mut self, ui: &mut egui::Ui) {
        egui::Frame::new()
            .fill(egui::Color32::from_rgb(30, 30, 30))
            .inner_margin(12.0)
            .corner_radius(8.0)
            .show(ui, |ui| {
                let title = if self.form.editing.is_some() {
                    "Edit record"
                } else {
                    "New record"
                };
                ui.label(egui::RichText::new(title).size(18.0).strong());
                ui.add_space(6.0);

                egui::Grid::new("record_form")
                    .num_columns(2)
                    .spacing([10.0, 8.0])
                    .show(ui, |ui| {
                        ui.label("Attribute");
                        ui.add(
                            egui::TextEdit::singleline(&mut self.form.attribute)
                                .hint_text("e.g. Work Email")
                                .desired_width(f32::INFINITY),
                        );
                        ui.end_row();

                        ui.label("Value");
                        ui.add(
                            egui::TextEdit::singleline(&mut self.form.value)
                                .hint_text("e.g. jane@company.example")
                                .desired_width(f32::INFINITY),
                        );
                        ui.end_row();

                        ui.label("Description");
                        ui.add(
                            egui::TextEdit::multiline(&mut self.form.description)
                                .hint_text("When should this be used?")
                                .desired_rows(2)
                                .desired_width(f32::INFINITY),
                        );
                        ui.end_row();
                    });

                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    let label = if self.form.editing.is_some() {
                        "Update"
                    } else {
                        "Add"
                    };
                    let save = ui.add(
                        egui::Button::new(egui::RichText::new(label).size(16.0).strong())
                            .fill(ACCENT)
                            .min_size(egui::vec2(80.0, 30.0)),
                    );
                    if save.clicked() {
                        self.submit();
                    }
                    if self.form.editing.is_some() && ui.button("Cancel").clicked() {
                        self.form.clear();
                    }
                });
            });
    }

    fn render_notice(&self, ui: &mut egui::Ui) {
        if let Some((text, is_error)) = &self.notice {
            let color = if *is_error {
                egui::Color32::from_rgb(239, 68, 68)
            } else {
                egui::Color32::GREEN
            };
            ui.label(egui::RichText::new(text).color(color));
        }
    }

    /// Records matching the search box, best match first. An empty search
    /// lists everything in store order.
    fn visible_records(&self) -> Vec<Record> {
        let query = self.search.trim();
        if query.is_empty() {
            return self.store.records().to_vec();
        }
        self.store
            .similarity_search(query, self.store.records().len())
            .into_iter()
            .map(|(r, _)| r.clone())
            .collect()
    }

    fn render_records(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Search");
            ui.add(
                egui::TextEdit::singleline(&mut self.search)
                    .hint_text("e.g. billing address")
                    .desired_width(f32::INFINITY),
            );
        });
        ui.add_space(10.0);

        let records = self.visible_records();
        let mut to_edit = None;
        let mut to_delete = None;

        egui::ScrollArea::vertical()
            .auto_shrink([false; 2])
            .show(ui, |ui| {
                if records.is_empty() {
                    ui.label(egui::RichText::new("No records.").color(egui::Color32::GRAY));
                }
                for record in &records {
                    egui::Frame::new()
                        .fill(egui::Color32::from_rgb(35, 35, 35))
                        .corner_radius(8.0)
                        .inner_margin(12.0)
                        .stroke(egui::Stroke::new(1.0, egui::Color32::from_rgb(50, 50, 50)))
                        .show(ui, |ui| {
                            ui.set_min_width(ui.available_width());
                            ui.horizontal(|ui| {
                                ui.vertical(|ui| {
                                    ui.label(
                                        egui::RichText::new(&record.attribute)
                                            .size(16.0)
                                            .strong(),
                                    );
                                    ui.label(egui::RichText::new(&record.value).size(16.0));
                                    if !record.description.is_empty() {
                                        ui.label(
                                            egui::RichText::new(&record.description)
                                                .color(egui::Color32::GRAY),
                                        );
                                    }
                                });
                                ui.with_layout(
                                    egui::Layout::right_to_left(egui::Align::Center),
                                    |ui| {
                                        if ui.button("Delete").clicked() {
                                            to_delete = Some(record.id.clone());
                                        }
                                        if ui.button("Edit").clicked() {
                                            to_edit = Some(record.clone());
                                        }
                                    },
                                );
                            });
                        });
                    ui.add_space(8.0);
                }
            });

        if let Some(record) = to_edit {
            self.form.load(&record);
        }
        if let Some(id) = to_delete {
            match self.store.delete(&id) {
                Ok(removed) => {
                    if self.form.editing.as_deref() == Some(id.as_str()) {
                        self.form.clear();
                    }
                    self.notify(format!("Deleted {}.", removed.attribute), false);
                }
                Err(e) => self.notify(format!("Could not delete: {e}"), true),
            }
        }
    }
}

impl eframe::App for DataManagerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let width = f32::min(900.0, ui.available_width() - 40.0);

            ui.vertical_centered(|ui| {
                ui.set_max_width(width);

                self.render_header(ui);
                self.render_dashboard(ui);
                ui.add_space(20.0);

                self.render_form(ui);
                self.render_notice(ui);
                ui.add_space(20.0);

                ui.separator();
                self.render_records(ui);
            });
        });
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    securefill::logging::init("securefill=info");

    let config = Config::load(None)?;
    let store = DataStore::open(config.data_store_path())?;
    tracing::info!(
        path = %store.path().display(),
        records = store.records().len(),
        "opened data store"
    );

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([700.0, 850.0])
            .with_min_inner_size([450.0, 500.0]),
        ..Default::default()
    };

    eframe::run_native(
        "SecureFill Data Manager",
        native_options,
        Box::new(|cc| Ok(Box::new(DataManagerApp::new(cc, store)))),
    )
    .map_err(|e| anyhow::anyhow!("data manager window failed: {e}"))
}
