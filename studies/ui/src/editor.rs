use std::sync::mpsc::Receiver;
use crate::state::{ EvalState, StateMutex };

pub struct Editor {
    pub rx: Receiver<EvalState>,
    pub state_nn: StateMutex,
}

impl Editor {
    /// Copies every received snapshot into the shared state until all senders are gone.
    pub fn listen_and_update(&self) {
        while let Ok(received_state) = self.rx.recv() {
            match self.state_nn.lock() {
                Ok(mut state_nn) => {
                    *state_nn = received_state;
                }
                Err(_) => eprintln!("failed to lock state_nn"),
            }
        }
    }
}
