use eframe::egui;

use crate::ui::state::{AuthForm, AuthMode};

#[derive(Default)]
pub struct AuthActions {
    pub submit: bool,
    pub toggle_mode: bool,
}

pub fn render(ui: &mut egui::Ui, form: &mut AuthForm) -> AuthActions {
    let mut actions = AuthActions::default();
    let (title, submit_label, toggle_label) = match form.mode {
        AuthMode::SignIn => ("Sign in", "Sign in", "No account yet? Sign up"),
        AuthMode::SignUp => ("Create account", "Sign up", "Already registered? Sign in"),
    };

    ui.vertical_centered(|ui| {
        ui.add_space(60.0);
        ui.heading(title);
        ui.add_space(12.0);

        ui.add(
            egui::TextEdit::singleline(&mut form.username)
                .hint_text("Username")
                .desired_width(240.0),
        );
        let password = ui.add(
            egui::TextEdit::singleline(&mut form.password)
                .hint_text("Password")
                .password(true)
                .desired_width(240.0),
        );
        if password.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
            actions.submit = true;
        }

        ui.add_space(8.0);
        if ui
            .add_enabled(!form.busy, egui::Button::new(submit_label))
            .clicked()
        {
            actions.submit = true;
        }
        if form.busy {
            ui.spinner();
        }

        if let Some(error) = &form.error {
            ui.colored_label(egui::Color32::RED, error.as_str());
        }

        ui.add_space(8.0);
        if ui.link(toggle_label).clicked() {
            actions.toggle_mode = true;
        }
    });

    actions
}
