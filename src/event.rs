use mio::event::Event;
use mio::Token;

/// Readiness snapshot decoupled from the poll's event buffer.
///
/// The dispatch pass mutates the session map while walking ready
/// connections, so it first copies each event out of `mio::Events`. The
/// reactor also builds these by hand when it re-dispatches a session whose
/// fairness budget ran out before the transport was drained.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub fn capture(event: &Event) -> Self {
        Readiness {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
        }
    }
}
