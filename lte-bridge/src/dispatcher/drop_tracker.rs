use crate::modem::event::NetworkState;

/// Counts connection drops from the stream of registration states.
///
/// A drop is a registered (home or roaming) state followed by `NotRegistered` or
/// `OutOfCoverage`. Once counted, further disconnected states are ignored until
/// the modem registers again.
#[derive(Debug, Default)]
pub struct DropTracker {
    registered: bool,
}

impl DropTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one state into the tracker. Returns `true` when it completes a drop.
    pub fn on_network_state(&mut self, state: Option<NetworkState>) -> bool {
        match state {
            Some(state) if state.is_registered() => {
                self.registered = true;
                false
            }

            Some(NetworkState::NotRegistered | NetworkState::OutOfCoverage)
                if self.registered =>
            {
                self.registered = false;
                true
            }

            // searching, denied, emergency and unknown codes leave the flag alone
            _ => false,
        }
    }

    #[cfg(test)]
    fn is_registered(&self) -> bool {
        self.registered
    }
}
