use std::fmt;

/// Possible steps causing the timeout in an error returned by [`Pool::get()`]
/// method.
///
/// [`Pool::get()`]: super::Pool::get
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimeoutType {
    /// Timeout happened while waiting for a slot to become available.
    Wait,

    /// Timeout happened while opening a new connection.
    Create,
}

/// Possible errors returned by [`Pool::get()`] method.
///
/// [`Pool::get()`]: super::Pool::get
#[derive(Debug)]
pub enum PoolError<E> {
    /// Timeout happened.
    Timeout(TimeoutType),

    /// Backend reported an error while opening a connection. Emitted only
    /// after the configured number of immediate retries has been exhausted.
    Backend(E),

    /// The connection failed validation. Only returned by [`Pool::ping()`];
    /// connections failing validation on the acquire path are closed and
    /// replaced transparently.
    ///
    /// [`Pool::ping()`]: super::Pool::ping
    Unhealthy,

    /// [`Pool`] has been closed.
    ///
    /// [`Pool`]: super::Pool
    Closed,
}

impl<E> From<E> for PoolError<E> {
    fn from(e: E) -> Self {
        Self::Backend(e)
    }
}

impl<E: fmt::Display> fmt::Display for PoolError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(tt) => match tt {
                TimeoutType::Wait => write!(
                    f,
                    "Timeout occurred while waiting for a slot to become available"
                ),
                TimeoutType::Create => {
                    write!(f, "Timeout occurred while opening a new connection")
                }
            },
            Self::Backend(e) => write!(f, "Error occurred while opening a new connection: {}", e),
            Self::Unhealthy => write!(f, "Connection failed validation"),
            Self::Closed => write!(f, "Pool has been closed"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PoolError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Timeout(_) | Self::Unhealthy | Self::Closed => None,
            Self::Backend(e) => Some(e),
        }
    }
}

/// Error returned by [`PoolBuilder::build()`] when the configuration is
/// rejected by [`PoolConfig::validate()`].
///
/// [`PoolBuilder::build()`]: super::PoolBuilder::build
/// [`PoolConfig::validate()`]: super::PoolConfig::validate
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConfigError(pub(crate) &'static str);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid pool configuration: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}
