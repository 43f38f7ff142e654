use eframe::egui;

use crate::common::ChatMessage;
use crate::feed::FeedState;
use crate::ui::state::{AppState, ChatMode, format_time, sender_label};

pub fn render(ui: &mut egui::Ui, state: &AppState) {
    let title = match (&state.mode, &state.selected_peer) {
        (ChatMode::Public, _) => "Public chat".to_string(),
        (ChatMode::Private, Some(peer)) => format!("Chat with {}", peer.username),
        (ChatMode::Private, None) => "Private chat".to_string(),
    };
    ui.heading(title);
    ui.separator();

    let Some(feed) = &state.feed else {
        ui.centered_and_justified(|ui| {
            ui.label(egui::RichText::new("Select a user to start chatting").weak());
        });
        return;
    };

    if let Some(error) = &feed.error {
        ui.colored_label(egui::Color32::RED, format!("Could not load messages: {error}"));
    }

    if feed.loading {
        ui.horizontal(|ui| {
            ui.spinner();
            ui.label("Loading messages...");
        });
        return;
    }

    if feed.is_empty() {
        ui.centered_and_justified(|ui| {
            ui.label(egui::RichText::new(empty_text(feed)).weak());
        });
        return;
    }

    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .stick_to_bottom(true)
        .show(ui, |ui| {
            for message in &feed.messages {
                render_message(ui, state, feed, message);
                ui.add_space(4.0);
            }
        });
}

fn empty_text(feed: &FeedState) -> &'static str {
    if feed.scope.is_private() {
        "No messages yet. Say hello!"
    } else {
        "No messages yet. Start the conversation!"
    }
}

fn render_message(ui: &mut egui::Ui, state: &AppState, feed: &FeedState, message: &ChatMessage) {
    let own = state.is_own(message);
    let label = match state.current_user() {
        Some(me) => sender_label(message, me.id, &feed.scope),
        None => message.display_name(),
    };

    let layout = if own {
        egui::Layout::right_to_left(egui::Align::TOP)
    } else {
        egui::Layout::left_to_right(egui::Align::TOP)
    };

    ui.with_layout(layout, |ui| {
        let fill = if own {
            ui.visuals().selection.bg_fill
        } else {
            ui.visuals().faint_bg_color
        };

        egui::Frame::group(ui.style()).fill(fill).show(ui, |ui| {
            ui.set_max_width(ui.available_width() * 0.7);
            ui.vertical(|ui| {
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new(label).strong());
                    ui.label(
                        egui::RichText::new(format_time(message.created_at))
                            .small()
                            .weak(),
                    );
                });
                ui.label(message.content.as_str());
            });
        });
    });
}
