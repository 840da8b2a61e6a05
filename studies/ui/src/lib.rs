use std::{ sync::{ mpsc::Receiver, Arc, Mutex }, thread::{ self, JoinHandle } };

use editor::Editor;
use state::{ EvalState, StateMutex };
use ui::App;
use color_eyre::Result;

pub mod ui;
pub mod state;
pub mod editor;

/// Spawns the editor thread that mirrors every snapshot from `rx` into a shared state.
pub fn listen(rx: Receiver<EvalState>) -> (StateMutex, JoinHandle<()>) {
    let state_nn = Arc::new(Mutex::new(EvalState::default()));

    let editor = Editor {
        rx,
        state_nn: Arc::clone(&state_nn),
    };

    let handle = thread::spawn(move || {
        editor.listen_and_update();
    });

    (state_nn, handle)
}

/// Takes over the terminal until the user quits.
pub fn run_dashboard(state_nn: StateMutex) -> Result<()> {
    color_eyre::install()?;

    let terminal = ratatui::init();
    let app_result = App::new(state_nn).run(terminal);
    ratatui::restore();
    app_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn listener_stops_when_sender_drops() {
        let (tx, rx) = mpsc::channel();
        let (state_nn, handle) = listen(rx);

        let mut state = EvalState::default();
        state.model = "Deeplab".to_string();
        tx.send(state).unwrap();
        drop(tx);

        handle.join().unwrap();
        assert_eq!(state_nn.lock().unwrap().model, "Deeplab");
    }
}
