/*!
GUI implementation for the I-Scan Wizard.

Every button that touches the rig submits a [`Job`] to the task runner;
the window itself only edits the queue and drains executor events once per
frame.
*/

use crate::config::AppConfig;
use crate::executor::ExecEvent;
use crate::state::{self, SharedState, StateSnapshot};
use crate::tasks::{DeviceCommand, Job, TaskRunner};
use eframe::egui;
use serde_json::Value;
use shared::rig;
use shared::scan_plan::{ScanPoint, ScanPreset};
use shared::{AngleInfo, Direction, Operation, OperationQueue};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Main GUI application state
pub struct WizardGui {
    config: AppConfig,
    config_path: PathBuf,
    simulate: bool,

    runner: TaskRunner,
    state: SharedState,
    snapshot: StateSnapshot,

    queue: OperationQueue,
    selected: Option<usize>,
    repeat: bool,

    // Status
    log: VecDeque<String>,
    status_message: String,

    // Temporary UI values
    temp_base_url: String,
    servo_angle: u8,
    move_distance_cm: f64,
    move_direction: Direction,
    drive_step_cm: f64,
    led_rgb: [u8; 3],
    brightness: u8,
    photo_delay: f64,
    camera_index: u32,
    calc_y: f64,
    csv_path: String,
    params_text: String,
    apply_key: String,
    apply_value: String,
    plan_points: Vec<ScanPoint>,
}

impl WizardGui {
    /// Create a new GUI instance
    pub fn new(
        config: AppConfig,
        config_path: PathBuf,
        simulate: bool,
        state: SharedState,
        _cc: &eframe::CreationContext<'_>,
    ) -> Self {
        let device = crate::connect(&config, simulate);
        let runner = TaskRunner::start(device, std::sync::Arc::clone(&state), &config);
        let snapshot = state::lock(&state).snapshot();

        Self {
            temp_base_url: config.device.base_url.clone(),
            photo_delay: config.executor.photo_delay_secs,
            config,
            config_path,
            simulate,
            runner,
            state,
            snapshot,
            queue: OperationQueue::new(),
            selected: None,
            repeat: false,
            log: VecDeque::new(),
            status_message: "Ready".to_string(),
            servo_angle: 45,
            move_distance_cm: 5.0,
            move_direction: Direction::Up,
            drive_step_cm: 1.0,
            led_rgb: [0xB0, 0x0B, 0x69],
            brightness: 50,
            camera_index: 0,
            calc_y: 0.0,
            csv_path: "queue.csv".to_string(),
            params_text: String::new(),
            apply_key: "delay".to_string(),
            apply_value: "1.0".to_string(),
            plan_points: Vec::new(),
        }
    }

    /// Swap in a new device connection; the running job is cancelled
    fn reconnect(&mut self) {
        self.config.device.base_url = self.temp_base_url.trim().to_string();
        self.runner.shutdown();
        let device = crate::connect(&self.config, self.simulate);
        self.runner = TaskRunner::start(device, std::sync::Arc::clone(&self.state), &self.config);
        self.status_message = format!("Connected to {}", self.config.device.base_url);
        info!("🔌 {}", self.status_message);
    }

    fn submit(&mut self, job: Job) {
        if self.runner.is_busy() {
            self.status_message = "Busy, job queued behind the current one".to_string();
        }
        self.runner.submit(job);
    }

    /// Append, or insert right after the selected entry
    fn enqueue(&mut self, operation: Operation) {
        self.push_log(format!("Added to queue: {}", operation.description));
        match self.selected {
            Some(index) => match self.queue.insert(index + 1, operation) {
                Ok(()) => self.select(Some(index + 1)),
                Err(e) => self.status_message = e.to_string(),
            },
            None => self.queue.add(operation),
        }
    }

    fn push_log(&mut self, line: String) {
        self.log.push_back(line);
        while self.log.len() > self.config.gui.max_log_lines.max(1) {
            self.log.pop_front();
        }
    }

    fn led_hex(&self) -> String {
        format!(
            "#{:02X}{:02X}{:02X}",
            self.led_rgb[0], self.led_rgb[1], self.led_rgb[2]
        )
    }

    fn select(&mut self, index: Option<usize>) {
        self.selected = index;
        self.params_text = index
            .and_then(|i| self.queue.get(i))
            .and_then(|op| serde_json::to_string_pretty(&op.params).ok())
            .unwrap_or_default();
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.runner.events().try_recv() {
            match event {
                ExecEvent::Log(line) => self.push_log(line),
                ExecEvent::StateChanged(snapshot) => self.snapshot = snapshot,
                ExecEvent::PhotoRequested {
                    camera_index,
                    description,
                } => self.push_log(format!("📷 Camera {}: {}", camera_index, description)),
                ExecEvent::OperationFailed {
                    index,
                    description,
                    error,
                } => self.push_log(format!("❌ {}. {}: {}", index + 1, description, error)),
                ExecEvent::Finished {
                    label,
                    executed,
                    failed,
                    cancelled,
                } => {
                    self.status_message = if cancelled {
                        format!("{}: cancelled", label)
                    } else {
                        format!("{}: {} ok, {} failed", label, executed, failed)
                    };
                }
            }
        }
    }

    fn connection_panel(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("📡 Connection");
            ui.horizontal(|ui| {
                ui.label("Base URL:");
                ui.text_edit_singleline(&mut self.temp_base_url);
                if ui.button("🔌 Apply").clicked() {
                    self.reconnect();
                }
            });
            if self.simulate {
                ui.colored_label(egui::Color32::YELLOW, "🧪 Simulated rig");
            }
        });
    }

    fn servo_panel(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("🎯 Servo");
            ui.add(egui::Slider::new(&mut self.servo_angle, 0..=90).text("°"));
            ui.horizontal(|ui| {
                if ui.button("▶ Execute").clicked() {
                    self.submit(Job::Device(DeviceCommand::Servo(self.servo_angle)));
                }
                if ui.button("➕ Add to queue").clicked() {
                    self.enqueue(Operation::servo(self.servo_angle));
                }
            });

            let mut tracking = self.snapshot.tracking;
            if ui.checkbox(&mut tracking, "Track target after moves").changed() {
                state::lock(&self.state).set_tracking(tracking);
                self.config.rig.tracking = tracking;
                self.snapshot = state::lock(&self.state).snapshot();
            }
        });
    }

    fn stepper_panel(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("⚙ Stepper");
            ui.horizontal(|ui| {
                ui.label("Distance (cm):");
                ui.add(egui::DragValue::new(&mut self.move_distance_cm).speed(0.1).range(0.0..=200.0));
                ui.radio_value(&mut self.move_direction, Direction::Up, "Up");
                ui.radio_value(&mut self.move_direction, Direction::Down, "Down");
            });
            ui.horizontal(|ui| {
                ui.label("Speed:");
                ui.add(egui::DragValue::new(&mut self.config.rig.motor_speed).range(1..=1000));
                ui.label("Wheel ⌀ (mm):");
                ui.add(egui::DragValue::new(&mut self.config.rig.wheel_diameter_mm).speed(0.1).range(1.0..=200.0));
            });

            match rig::steps_for_distance(self.move_distance_cm, self.config.rig.wheel_diameter_mm) {
                Ok(steps) => {
                    ui.label(format!("= {} steps", steps));
                    ui.horizontal(|ui| {
                        if ui.button("▶ Execute").clicked() {
                            self.submit(Job::Device(DeviceCommand::Move {
                                steps,
                                direction: self.move_direction,
                                speed: Some(self.config.rig.motor_speed),
                            }));
                        }
                        if ui.button("➕ Add to queue").clicked() {
                            self.enqueue(Operation::stepper_steps(
                                steps,
                                self.move_direction,
                                self.config.rig.motor_speed,
                                self.move_distance_cm,
                            ));
                        }
                    });
                }
                Err(e) => {
                    ui.colored_label(egui::Color32::RED, e.to_string());
                }
            }

            ui.separator();
            ui.horizontal(|ui| {
                ui.label("Drive step (cm):");
                ui.add(egui::DragValue::new(&mut self.drive_step_cm).speed(0.1).range(0.1..=100.0));
            });
            ui.horizontal(|ui| {
                for direction in [Direction::Up, Direction::Down] {
                    let op = Operation::stepper_distance(self.drive_step_cm, direction, self.config.rig.motor_speed);
                    let label = if direction == Direction::Up { "⬆ Drive up" } else { "⬇ Drive down" };
                    if ui.button(label).clicked() {
                        self.submit(Job::RunOperation(op.clone()));
                    }
                    if ui.small_button("➕").clicked() {
                        self.enqueue(op);
                    }
                }
            });
            ui.horizontal(|ui| {
                if ui.button("🏠 Home").clicked() {
                    self.submit(Job::Home);
                }
                if ui.small_button("➕").clicked() {
                    self.enqueue(Operation::home());
                }
                if ui.button("🔘 Button state").clicked() {
                    self.submit(Job::Device(DeviceCommand::Button));
                }
                if ui.small_button("➕").clicked() {
                    self.enqueue(Operation::button());
                }
            });
        });
    }

    fn led_panel(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("💡 LED");
            ui.horizontal(|ui| {
                ui.color_edit_button_srgb(&mut self.led_rgb);
                let hex = self.led_hex();
                ui.monospace(&hex);
                if ui.button("▶ Set").clicked() {
                    self.submit(Job::Device(DeviceCommand::LedColor(hex.clone())));
                }
                if ui.button("➕").clicked() {
                    match Operation::led_color(&hex) {
                        Ok(op) => self.enqueue(op),
                        Err(e) => self.status_message = e.to_string(),
                    }
                }
            });
            ui.horizontal(|ui| {
                ui.add(egui::Slider::new(&mut self.brightness, 0..=100).text("%"));
                if ui.button("▶ Set").clicked() {
                    self.submit(Job::Device(DeviceCommand::Brightness(self.brightness)));
                }
                if ui.button("➕").clicked() {
                    self.enqueue(Operation::led_brightness(self.brightness));
                }
            });
        });
    }

    fn camera_panel(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("📷 Photo");
            ui.horizontal(|ui| {
                ui.label("Camera:");
                ui.add(egui::DragValue::new(&mut self.camera_index).range(0..=9));
                ui.label("Delay (s):");
                ui.add(egui::DragValue::new(&mut self.photo_delay).speed(0.1).range(0.0..=30.0));
                if ui.button("➕ Add to queue").clicked() {
                    self.enqueue(Operation::photo(self.photo_delay, self.camera_index));
                }
            });
        });
    }

    fn calculator_panel(&mut self, ui: &mut egui::Ui) {
        ui.collapsing("📐 Angle calculator", |ui| {
            ui.horizontal(|ui| {
                ui.label("Target X:");
                ui.add(egui::DragValue::new(&mut self.config.rig.geometry.target_x).speed(0.5));
                ui.label("Target Y:");
                ui.add(egui::DragValue::new(&mut self.config.rig.geometry.target_y).speed(0.5));
                ui.label("Sensor X:");
                ui.add(egui::DragValue::new(&mut self.config.rig.geometry.sensor_x).speed(0.5));
            });
            if ui.button("Apply geometry").clicked() {
                let mut state = state::lock(&self.state);
                let result = state
                    .set_geometry(self.config.rig.geometry)
                    .and_then(|_| state.set_wheel_diameter(self.config.rig.wheel_diameter_mm));
                self.status_message = match result {
                    Ok(()) => "Geometry applied".to_string(),
                    Err(e) => e.to_string(),
                };
                self.snapshot = state.snapshot();
            }

            ui.horizontal(|ui| {
                ui.label("Sensor Y (cm):");
                ui.add(egui::DragValue::new(&mut self.calc_y).speed(0.5));
            });
            match self.config.rig.geometry.angle_info(self.calc_y) {
                Ok(info) => {
                    angle_info_grid(ui, &info);
                    if ui.button("➕ Add servo for this Y").clicked() {
                        self.enqueue(Operation::servo(info.servo_angle));
                    }
                }
                Err(e) => {
                    ui.colored_label(egui::Color32::RED, e.to_string());
                }
            }

            ui.separator();
            ui.label("Scan plan");
            ui.horizontal(|ui| {
                for preset in ScanPreset::ALL {
                    if ui.button(preset.name()).clicked() {
                        self.config.scan = preset.config();
                    }
                }
            });
            ui.horizontal(|ui| {
                ui.label("Distance (cm):");
                ui.add(egui::DragValue::new(&mut self.config.scan.scan_distance_cm).range(1.0..=500.0));
                ui.label("Points:");
                ui.add(egui::DragValue::new(&mut self.config.scan.measurements).range(2..=500));
            });
            ui.horizontal(|ui| {
                if ui.button("Preview").clicked() {
                    match self.config.scan.scan_points() {
                        Ok(points) => self.plan_points = points,
                        Err(e) => self.status_message = e.to_string(),
                    }
                }
                if ui.button("Load plan into queue").clicked() {
                    match self.config.scan.build_queue() {
                        Ok(queue) => {
                            self.push_log(format!("Loaded scan plan with {} operations", queue.len()));
                            self.queue = queue;
                            self.select(None);
                        }
                        Err(e) => self.status_message = e.to_string(),
                    }
                }
            });
            if !self.plan_points.is_empty() {
                egui::Grid::new("scan_points").striped(true).show(ui, |ui| {
                    ui.strong("#");
                    ui.strong("Y (cm)");
                    ui.strong("Angle");
                    ui.strong("Reachable");
                    ui.end_row();
                    for point in &self.plan_points {
                        ui.label(point.number.to_string());
                        ui.label(format!("{:.1}", point.y_cm));
                        ui.label(format!("{}° ({:.1}°)", point.servo_angle, point.raw_angle));
                        ui.label(if point.reachable { "✅" } else { "❌" });
                        ui.end_row();
                    }
                });
            }
        });
    }

    fn queue_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading(format!("📋 Operation queue ({})", self.queue.len()));

        egui::ScrollArea::vertical()
            .id_salt("queue_list")
            .max_height(260.0)
            .show(ui, |ui| {
                let mut clicked = None;
                for (i, line) in self.queue.display_lines().into_iter().enumerate() {
                    if ui.selectable_label(self.selected == Some(i), line).clicked() {
                        clicked = Some(i);
                    }
                }
                if let Some(i) = clicked {
                    self.select(Some(i));
                }
            });

        ui.horizontal_wrapped(|ui| {
            let selected = self.selected;
            if ui.add_enabled(selected.is_some(), egui::Button::new("🗑 Remove")).clicked() {
                if let Some(i) = selected {
                    if let Err(e) = self.queue.remove(i) {
                        self.status_message = e.to_string();
                    }
                    let next = if self.queue.is_empty() { None } else { Some(i.min(self.queue.len() - 1)) };
                    self.select(next);
                }
            }
            if ui.add_enabled(selected.is_some(), egui::Button::new("⧉ Duplicate")).clicked() {
                if let Some(i) = selected {
                    if let Err(e) = self.queue.duplicate(i) {
                        self.status_message = e.to_string();
                    }
                }
            }
            if ui.add_enabled(selected.is_some(), egui::Button::new("⬆")).clicked() {
                if let Some(i) = selected {
                    match self.queue.move_up(i) {
                        Ok(new_index) => self.select(Some(new_index)),
                        Err(e) => self.status_message = e.to_string(),
                    }
                }
            }
            if ui.add_enabled(selected.is_some(), egui::Button::new("⬇")).clicked() {
                if let Some(i) = selected {
                    match self.queue.move_down(i) {
                        Ok(new_index) => self.select(Some(new_index)),
                        Err(e) => self.status_message = e.to_string(),
                    }
                }
            }
            if ui.button("🧹 Clear").clicked() {
                self.queue.clear();
                self.select(None);
            }
            if ui.add_enabled(selected.is_some(), egui::Button::new("▶ Execute selected")).clicked() {
                if let Some(op) = selected.and_then(|i| self.queue.get(i)).cloned() {
                    self.submit(Job::RunOperation(op));
                }
            }
        });

        if let Some(index) = self.selected {
            ui.collapsing("✏ Edit parameters", |ui| {
                ui.add(egui::TextEdit::multiline(&mut self.params_text).code_editor().desired_rows(4));
                if ui.button("Apply parameters").clicked() {
                    let result = serde_json::from_str::<Value>(&self.params_text)
                        .map_err(|e| e.to_string())
                        .and_then(|value| match value {
                            Value::Object(params) => Ok(params),
                            _ => Err("parameters must be a JSON object".to_string()),
                        })
                        .and_then(|params| {
                            self.queue
                                .replace_params(index, params)
                                .map_err(|e| e.to_string())
                        });
                    self.status_message = match result {
                        Ok(()) => format!("Updated operation {}", index + 1),
                        Err(e) => e,
                    };
                }
            });
        }

        ui.horizontal(|ui| {
            ui.label("Set on all:");
            ui.add(egui::TextEdit::singleline(&mut self.apply_key).desired_width(80.0));
            ui.label("=");
            ui.add(egui::TextEdit::singleline(&mut self.apply_value).desired_width(80.0));
            if ui.button("Apply").clicked() {
                match serde_json::from_str::<Value>(&self.apply_value) {
                    Ok(value) if !self.apply_key.trim().is_empty() => {
                        match self.queue.apply_to_all(self.apply_key.trim(), value) {
                            Ok(()) => self.select(self.selected),
                            Err(e) => self.status_message = format!("Not applied: {}", e),
                        }
                    }
                    Ok(_) => self.status_message = "Parameter name is empty".to_string(),
                    Err(e) => self.status_message = format!("Value must be JSON: {}", e),
                }
            }
        });

        ui.horizontal(|ui| {
            ui.label("CSV:");
            ui.text_edit_singleline(&mut self.csv_path);
            if ui.button("📥 Import").clicked() {
                match self.queue.import_csv(&self.csv_path) {
                    Ok(count) => {
                        self.push_log(format!("Imported {} operations from {}", count, self.csv_path));
                        self.select(None);
                    }
                    Err(e) => {
                        error!("Import failed: {}", e);
                        self.status_message = format!("Import failed: {}", e);
                    }
                }
            }
            if ui.button("📤 Export").clicked() {
                match self.queue.export_csv(&self.csv_path) {
                    Ok(()) => self.push_log(format!("Exported queue to {}", self.csv_path)),
                    Err(e) => self.status_message = format!("Export failed: {}", e),
                }
            }
        });

        ui.separator();
        ui.horizontal(|ui| {
            let busy = self.runner.is_busy();
            ui.checkbox(&mut self.repeat, "🔁 Repeat");
            if ui.add_enabled(!self.queue.is_empty(), egui::Button::new("▶ Run queue")).clicked() {
                self.submit(Job::RunQueue {
                    queue: self.queue.clone(),
                    repeat: self.repeat,
                });
            }
            let paused = self.runner.is_paused();
            if ui
                .add_enabled(busy, egui::Button::new(if paused { "▶ Resume" } else { "⏸ Pause" }))
                .clicked()
            {
                self.runner.set_paused(!paused);
            }
            if ui.add_enabled(busy, egui::Button::new("🛑 Cancel")).clicked() {
                self.runner.cancel_current();
            }
        });
    }

    fn status_panel(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("📊 Status");
            ui.horizontal(|ui| {
                ui.label("Runner:");
                if self.runner.is_paused() {
                    ui.colored_label(egui::Color32::YELLOW, "⏸ Paused");
                } else if self.runner.is_busy() {
                    ui.colored_label(egui::Color32::GREEN, "🟢 Running");
                } else {
                    ui.colored_label(egui::Color32::GRAY, "⚪ Idle");
                }
            });
            ui.horizontal(|ui| {
                ui.label("Position:");
                ui.label(format!("{:.2} cm", self.snapshot.position_cm));
                ui.label("Servo:");
                ui.label(format!("{}°", self.snapshot.servo_angle));
                if let Some(angle) = self.snapshot.target_angle {
                    ui.label(format!("(target {}°)", angle));
                }
                if !self.snapshot.homed {
                    ui.colored_label(egui::Color32::YELLOW, "not homed");
                }
            });
            ui.horizontal(|ui| {
                ui.label("Message:");
                ui.label(&self.status_message);
            });
        });
    }
}

fn angle_info_grid(ui: &mut egui::Ui, info: &AngleInfo) {
    egui::Grid::new("angle_info").show(ui, |ui| {
        ui.label("dx / dy:");
        ui.label(format!("{:.2} / {:.2} cm", info.dx, info.dy));
        ui.end_row();
        ui.label("Bearing:");
        ui.label(format!("{:.2}°", info.bearing_deg));
        ui.end_row();
        ui.label("Angle to horizontal:");
        ui.label(format!("{:.2}°", info.angle_to_horizontal));
        ui.end_row();
        ui.label("Servo:");
        let color = if info.limit.is_limited() {
            egui::Color32::YELLOW
        } else {
            egui::Color32::GREEN
        };
        ui.colored_label(color, format!("{}° ({})", info.servo_angle, info.limit.as_str()));
        ui.end_row();
        ui.label("Distance:");
        ui.label(format!("{:.2} cm", info.distance_to_target));
        ui.end_row();
    });
}

impl eframe::App for WizardGui {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();

        egui::SidePanel::left("controls").min_width(420.0).show(ctx, |ui| {
            egui::ScrollArea::vertical().id_salt("controls_scroll").show(ui, |ui| {
                ui.heading("🧙 I-Scan Wizard");
                ui.separator();
                self.connection_panel(ui);
                self.servo_panel(ui);
                self.stepper_panel(ui);
                self.led_panel(ui);
                self.camera_panel(ui);
                self.calculator_panel(ui);

                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("💾 Save Config").clicked() {
                        self.status_message = match self.config.save_to_file(&self.config_path) {
                            Ok(_) => "Configuration saved".to_string(),
                            Err(e) => format!("Failed to save config: {}", e),
                        };
                    }
                    if ui.button("🔄 Load Config").clicked() {
                        match AppConfig::load_from_file(&self.config_path) {
                            Ok(config) => {
                                self.config = config;
                                self.temp_base_url = self.config.device.base_url.clone();
                                self.reconnect();
                                self.status_message = "Configuration loaded".to_string();
                            }
                            Err(e) => {
                                self.status_message = format!("Failed to load config: {}", e);
                            }
                        }
                    }
                });
            });
        });

        egui::TopBottomPanel::bottom("log").resizable(true).min_height(160.0).show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label("📜 Log");
                if ui.small_button("Clear").clicked() {
                    self.log.clear();
                }
            });
            egui::ScrollArea::vertical()
                .id_salt("log_scroll")
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for line in &self.log {
                        ui.monospace(line);
                    }
                });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.status_panel(ui);
            ui.separator();
            self.queue_panel(ui);
        });

        // keep polling executor events
        let interval = if self.runner.is_busy() { 100 } else { 500 };
        ctx.request_repaint_after(Duration::from_millis(interval));
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.runner.shutdown();

        // Auto-save configuration if enabled
        if self.config.gui.auto_save_config {
            if let Err(e) = self.config.save_to_file(&self.config_path) {
                error!("Failed to save config on exit: {}", e);
            }
        }
    }
}
