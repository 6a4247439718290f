//! Transport registry: maps the prefix of a target name to its transport
//!
//! Targets look like `<transport>:<address>`, e.g. `udp:127.0.0.1:6653` or
//! `unix:/run/switch.sock`. A [`Registry`] is an explicit value; callers
//! build one (usually via [`Registry::with_default_transports`]) and share it.

use crate::transport::{self, OpenOptions, Stream, StreamError};
use crate::vconn::{datagram, framed, Vconn, VconnError, VconnImpl};
use ofconn_shared::VersionBitmap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Opens a raw stream for `(name, suffix, options)`
pub type StreamOpenFn = fn(&str, &str, &OpenOptions) -> Result<Box<dyn Stream>, StreamError>;

/// Opens a framed connection for `(name, suffix, options)`
pub type VconnOpenFn = fn(&str, &str, &OpenOptions) -> Result<Box<dyn VconnImpl>, VconnError>;

/// A registered transport
#[derive(Clone, Copy)]
pub struct TransportClass {
    /// Prefix before the first `:` of a target name
    pub name: &'static str,
    /// Whether connections of this class want liveness probes
    pub needs_probes: bool,
    pub open_stream: StreamOpenFn,
    pub open_vconn: VconnOpenFn,
}

impl std::fmt::Debug for TransportClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClass")
            .field("name", &self.name)
            .field("needs_probes", &self.needs_probes)
            .finish_non_exhaustive()
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("transport '{0}' is already registered")]
    Duplicate(&'static str),
}

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("invalid target '{0}': expected <transport>:<address>")]
    InvalidTarget(String),

    #[error("no transport registered for '{0}'")]
    NotFound(String),

    #[error("failed to open '{target}': {source}")]
    Transport {
        target: String,
        #[source]
        source: VconnError,
    },

    #[error("failed to open stream '{target}': {source}")]
    StreamOpen {
        target: String,
        #[source]
        source: StreamError,
    },
}

#[derive(Debug, Default)]
pub struct Registry {
    classes: Vec<TransportClass>,
}

impl Registry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `tcp`, `udp` and (on Unix) `unix` installed
    pub fn with_default_transports() -> Self {
        let mut classes = vec![
            TransportClass {
                name: "tcp",
                needs_probes: true,
                open_stream: transport::tcp::open_stream,
                open_vconn: framed::open_tcp,
            },
            TransportClass {
                name: "udp",
                needs_probes: false,
                open_stream: transport::udp::open_stream,
                open_vconn: datagram::open_udp,
            },
        ];
        #[cfg(unix)]
        classes.push(TransportClass {
            name: "unix",
            needs_probes: false,
            open_stream: transport::unix::open_stream,
            open_vconn: framed::open_unix,
        });

        Self { classes }
    }

    pub fn register(&mut self, class: TransportClass) -> Result<(), RegistryError> {
        if self.resolve(class.name).is_some() {
            warn!("Transport '{}' registered twice", class.name);
            return Err(RegistryError::Duplicate(class.name));
        }
        debug!("Registered transport '{}'", class.name);
        self.classes.push(class);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Option<&TransportClass> {
        self.classes.iter().find(|class| class.name == name)
    }

    /// Names of all registered transports, in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.classes.iter().map(|class| class.name).collect()
    }

    /// Open a raw stream without message framing
    pub fn open_stream(
        &self,
        target: &str,
        opts: &OpenOptions,
    ) -> Result<Box<dyn Stream>, OpenError> {
        let (class, suffix) = self.lookup(target)?;
        (class.open_stream)(target, suffix, opts).map_err(|source| OpenError::StreamOpen {
            target: target.to_string(),
            source,
        })
    }

    /// Open a connection to `target` with default socket options
    pub fn open(&self, target: &str, allowed_versions: VersionBitmap) -> Result<Vconn, OpenError> {
        self.open_with(target, allowed_versions, &OpenOptions::default())
    }

    /// Open a connection to `target`.
    ///
    /// The returned connection may still be `Connecting`; drive it with
    /// [`Vconn::run`] and [`Vconn::wait`].
    pub fn open_with(
        &self,
        target: &str,
        allowed_versions: VersionBitmap,
        opts: &OpenOptions,
    ) -> Result<Vconn, OpenError> {
        let (class, suffix) = self.lookup(target)?;
        let inner = (class.open_vconn)(target, suffix, opts).map_err(|source| {
            warn!("Failed to open {}: {}", target, source);
            OpenError::Transport {
                target: target.to_string(),
                source,
            }
        })?;

        let mut vconn = Vconn::new(target, inner, allowed_versions, class.needs_probes);
        match vconn.connect() {
            Ok(()) | Err(VconnError::WouldBlock) => {
                info!("Opened {} ({})", target, vconn.state());
                Ok(vconn)
            }
            Err(source) => {
                vconn.close();
                Err(OpenError::Transport {
                    target: target.to_string(),
                    source,
                })
            }
        }
    }

    fn lookup<'t>(&self, target: &'t str) -> Result<(&TransportClass, &'t str), OpenError> {
        let (prefix, suffix) =
            split_target(target).ok_or_else(|| OpenError::InvalidTarget(target.to_string()))?;
        let class = self
            .resolve(prefix)
            .ok_or_else(|| OpenError::NotFound(prefix.to_string()))?;
        Ok((class, suffix))
    }
}

/// Split `<transport>:<address>` at the first colon
fn split_target(target: &str) -> Option<(&str, &str)> {
    match target.split_once(':') {
        Some((prefix, suffix)) if !prefix.is_empty() => Some((prefix, suffix)),
        _ => None,
    }
}
