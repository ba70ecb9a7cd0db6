use crossbeam_channel::{Receiver, Sender};
use protocol::{WorkerRequest, WorkerResponse};

use crate::engine_state::EngineState;

/// Worker thread entry point. Drains requests in order until the client side
/// hangs up; every request produces exactly one response.
pub(crate) fn run(receiver: Receiver<WorkerRequest>, sender: Sender<WorkerResponse>) {
    let mut state = EngineState::new();
    while let Ok(request) = receiver.recv() {
        let response = state.handle(request);
        if let WorkerResponse::Error { message } = &response {
            eprintln!("[worker] request failed: {message}");
        }
        if sender.send(response).is_err() {
            // Client dropped its receiver mid-request; nothing left to serve.
            break;
        }
    }
}
