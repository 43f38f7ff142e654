use eframe::egui;
use tokio::sync::mpsc;

use crate::common::{ChatCommand, ChatEvent};

use super::components::{auth_panel, chat_area, input_bar, sidebar};
use super::state::{AppState, ChatMode, SessionView};

pub struct ChatApp {
    state: AppState,
    command_sender: mpsc::Sender<ChatCommand>,
    event_receiver: mpsc::Receiver<ChatEvent>,
}

impl ChatApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        command_sender: mpsc::Sender<ChatCommand>,
        event_receiver: mpsc::Receiver<ChatEvent>,
    ) -> Self {
        Self {
            state: AppState::new(),
            command_sender,
            event_receiver,
        }
    }

    fn handle_backend_events(&mut self) {
        while let Ok(event) = self.event_receiver.try_recv() {
            let commands = self.state.apply_event(event);
            self.send_commands(commands);
        }
    }

    fn send_commands(&mut self, commands: impl IntoIterator<Item = ChatCommand>) {
        for command in commands {
            if let Err(err) = self.command_sender.try_send(command) {
                log::warn!("Failed to send command to backend: {err}");
                if let ChatCommand::SendMessage { scope, content } = err.into_inner() {
                    self.state.restore_draft(scope, content);
                }
            }
        }
    }

    fn render_restoring(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.centered_and_justified(|ui| {
                ui.spinner();
            });
        });
    }

    fn render_signed_out(&mut self, ctx: &egui::Context) {
        let actions = egui::CentralPanel::default()
            .show(ctx, |ui| auth_panel::render(ui, &mut self.state.auth_form))
            .inner;

        if actions.toggle_mode {
            self.state.toggle_auth_mode();
        }
        if actions.submit {
            let command = self.state.submit_auth();
            self.send_commands(command);
        }
    }

    fn render_chat(&mut self, ctx: &egui::Context) {
        let actions = egui::SidePanel::left("user_sidebar")
            .default_width(220.0)
            .show(ctx, |ui| sidebar::render(ui, &self.state))
            .inner;

        if let Some(mode) = actions.mode {
            let commands = self.state.select_mode(mode);
            self.send_commands(commands);
        }
        if let Some(peer) = actions.peer {
            let commands = self.state.select_peer(peer);
            self.send_commands(commands);
        }
        if actions.sign_out {
            let command = self.state.sign_out();
            self.send_commands([command]);
            return;
        }

        if let Some(status) = self.state.status.clone() {
            egui::TopBottomPanel::top("status_line").show(ctx, |ui| {
                ui.horizontal(|ui| {
                    ui.colored_label(egui::Color32::RED, status);
                    if ui.small_button("✕").clicked() {
                        self.state.status = None;
                    }
                });
            });
        }

        if self.state.current_scope().is_some() {
            let placeholder = match (&self.state.mode, &self.state.selected_peer) {
                (ChatMode::Private, Some(peer)) => format!("Message {}...", peer.username),
                _ => "Type a message...".to_string(),
            };
            let send = egui::TopBottomPanel::bottom("input_bar")
                .show(ctx, |ui| {
                    ui.add_space(4.0);
                    input_bar::render(ui, &mut self.state.input_text, &placeholder)
                })
                .inner;

            if send {
                let command = self.state.submit_message();
                self.send_commands(command);
            }
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            chat_area::render(ui, &self.state);
        });
    }
}

impl eframe::App for ChatApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.handle_backend_events();

        match self.state.session {
            SessionView::Restoring => self.render_restoring(ctx),
            SessionView::SignedOut => self.render_signed_out(ctx),
            SessionView::SignedIn(_) => self.render_chat(ctx),
        }

        ctx.request_repaint();
    }
}
