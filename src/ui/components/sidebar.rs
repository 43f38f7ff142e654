use crate::common::User;
use crate::ui::state::{AppState, ChatMode};
use eframe::egui;

#[derive(Default)]
pub struct SidebarActions {
    pub mode: Option<ChatMode>,
    pub peer: Option<User>,
    pub sign_out: bool,
}

pub fn render(ui: &mut egui::Ui, state: &AppState) -> SidebarActions {
    let mut actions = SidebarActions::default();

    if let Some(user) = state.current_user() {
        ui.horizontal(|ui| {
            ui.colored_label(egui::Color32::GREEN, "●");
            ui.label(egui::RichText::new(&user.username).strong());
        });
    }
    ui.separator();

    ui.horizontal(|ui| {
        if ui
            .selectable_label(state.mode == ChatMode::Public, "Public")
            .clicked()
        {
            actions.mode = Some(ChatMode::Public);
        }
        if ui
            .selectable_label(state.mode == ChatMode::Private, "Private")
            .clicked()
        {
            actions.mode = Some(ChatMode::Private);
        }
    });
    ui.separator();

    if state.mode == ChatMode::Private {
        ui.heading("Users");
        if state.roster_loading {
            ui.spinner();
        } else if state.roster.is_empty() {
            ui.label(egui::RichText::new("No other users yet").weak());
        }

        egui::ScrollArea::vertical()
            .max_height((ui.available_height() - 40.0).max(0.0))
            .show(ui, |ui| {
                for user in &state.roster {
                    let selected = state
                        .selected_peer
                        .as_ref()
                        .is_some_and(|peer| peer.id == user.id);

                    ui.horizontal(|ui| {
                        // Avatar: chữ cái đầu của username
                        ui.label(egui::RichText::new(user.initial()).monospace().strong());
                        if ui.selectable_label(selected, user.username.as_str()).clicked() {
                            actions.peer = Some(user.clone());
                        }
                    });
                }
            });
    }

    ui.with_layout(egui::Layout::bottom_up(egui::Align::LEFT), |ui| {
        ui.add_space(6.0);
        if ui.button("Sign out").clicked() {
            actions.sign_out = true;
        }
    });

    actions
}
