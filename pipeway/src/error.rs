use pipeway_buffer::BufferError;
use thiserror::Error;

/// A boxed error, used for causes thrown by user handlers and routed
/// through `exception_caught`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the pipeline core.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage asked for a buffer kind that no stage in the queried
    /// direction declares.
    #[error("no stage declares an {0} buffer")]
    NoBuffer(&'static str),

    /// A handler with this name is already registered.
    #[error("duplicate handler name {0:?}")]
    DuplicateName(String),

    /// No handler with this name is registered.
    #[error("no such handler {0:?} in pipeline")]
    UnknownHandler(String),

    /// The name is reserved for a pipeline sentinel.
    #[error("handler name {0:?} is reserved")]
    ReservedName(String),

    /// A handler failed to create its buffer at registration. Fatal to the
    /// registration: the handler is not added.
    #[error("handler {name:?} failed to create its {direction} buffer")]
    BufferFactory {
        /// Name the handler was being registered under.
        name: String,
        /// `"inbound"` or `"outbound"`.
        direction: &'static str,
        /// The factory's failure.
        #[source]
        source: BoxError,
    },

    /// An outbound operation was attempted on a closed transport.
    #[error("channel is closed")]
    ClosedChannel,

    /// A buffer operation inside the core failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}
