use thiserror::Error;
use tracing::debug;

use crate::sender::OutboundMessage;
use crate::update::Update;

pub const GREETING: &str = "Assalomu alaykum! Men ishga tushdim 🚀";
pub const ECHO_PREFIX: &str = "You wrote: ";

type Predicate = Box<dyn Fn(&Update) -> bool + Send + Sync>;
type Reply = Box<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no catch-all handler registered")]
    MissingCatchAll,
    #[error("handlers `{first}` and `{second}` are both catch-all")]
    DuplicateCatchAll {
        first: &'static str,
        second: &'static str,
    },
    #[error("catch-all handler `{0}` must be registered last")]
    CatchAllNotLast(&'static str),
    #[error("no handler matched update {update_id}")]
    NoHandlerMatched { update_id: i64 },
}

/// A predicate paired with the function that produces the reply text
pub struct HandlerRegistration {
    name: &'static str,
    predicate: Predicate,
    reply: Reply,
    catch_all: bool,
}

impl HandlerRegistration {
    /// Matches when the message text is exactly `command`
    pub fn command<R>(name: &'static str, command: &'static str, reply: R) -> Self
    where
        R: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::when(
            name,
            move |update: &Update| update.text() == Some(command),
            reply,
        )
    }

    pub fn when<P, R>(name: &'static str, predicate: P, reply: R) -> Self
    where
        P: Fn(&Update) -> bool + Send + Sync + 'static,
        R: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Box::new(predicate),
            reply: Box::new(reply),
            catch_all: false,
        }
    }

    /// Matches every text message; must be the last registration
    pub fn catch_all<R>(name: &'static str, reply: R) -> Self
    where
        R: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self {
            name,
            predicate: Box::new(|_: &Update| true),
            reply: Box::new(reply),
            catch_all: true,
        }
    }
}

/// Ordered routing table. First matching registration wins.
pub struct Dispatcher {
    handlers: Vec<HandlerRegistration>,
}

impl Dispatcher {
    /// Build the table, rejecting it unless exactly one catch-all sits at the end
    pub fn new(handlers: Vec<HandlerRegistration>) -> Result<Self, DispatchError> {
        let mut catch_all: Option<(usize, &'static str)> = None;
        for (index, handler) in handlers.iter().enumerate() {
            if !handler.catch_all {
                continue;
            }
            if let Some((_, first)) = catch_all {
                return Err(DispatchError::DuplicateCatchAll {
                    first,
                    second: handler.name,
                });
            }
            catch_all = Some((index, handler.name));
        }

        match catch_all {
            None => Err(DispatchError::MissingCatchAll),
            Some((index, name)) if index + 1 != handlers.len() => {
                Err(DispatchError::CatchAllNotLast(name))
            }
            Some(_) => Ok(Self { handlers }),
        }
    }

    /// Pick the reply for `update`. Updates without text produce nothing.
    pub fn dispatch(&self, update: &Update) -> Result<Option<OutboundMessage>, DispatchError> {
        let text = match update.text() {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(None),
        };

        let handler = self
            .handlers
            .iter()
            .find(|h| (h.predicate)(update))
            .ok_or(DispatchError::NoHandlerMatched {
                update_id: update.update_id(),
            })?;

        debug!(
            update_id = update.update_id(),
            handler = handler.name,
            "Routing update"
        );

        Ok(Some(OutboundMessage {
            chat_id: update.chat_id(),
            text: (handler.reply)(text),
        }))
    }
}

/// The echo bot: `/start` greets, everything else is echoed back
pub fn echo_bot() -> Result<Dispatcher, DispatchError> {
    Dispatcher::new(vec![
        HandlerRegistration::command("start", "/start", |_| GREETING.to_string()),
        HandlerRegistration::catch_all("echo", |text| format!("{ECHO_PREFIX}{text}")),
    ])
}
