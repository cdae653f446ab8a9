//! Arbitration between the hardware and software tracing paths.

use crate::{
    config::{BackendPolicy, Config},
    WarnCategory, WarnOnce,
};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Backend {
    Hardware,
    Software,
}

/// Why the software path is in use.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, strum::Display)]
pub enum SoftwareReason {
    #[strum(serialize = "requested")]
    Requested,
    #[strum(serialize = "disabled")]
    Disabled,
    #[strum(serialize = "hardware unsupported")]
    HardwareUnsupported,
    #[strum(serialize = "shaders missing")]
    ShaderMissing,
    #[strum(serialize = "hardware initialization failed")]
    HardwareFailed,
}

#[derive(Debug, Default)]
pub struct BackendSelector {
    backend: Option<Backend>,
    enabled: Option<bool>,
    reason: Option<SoftwareReason>,
    forced: Option<SoftwareReason>,
    hardware_active: bool,
    warnings: WarnOnce,
    status: String,
}

impl BackendSelector {
    pub fn new() -> Self {
        Self {
            status: "uninitialized".to_string(),
            ..Self::default()
        }
    }

    /// Pick the backend for this frame from the configuration and the
    /// device support.
    pub fn select(&mut self, config: &Config, hardware_supported: bool) -> Backend {
        let (backend, reason) = if !config.enable {
            (Backend::Software, Some(SoftwareReason::Disabled))
        } else if let Some(reason) = self.forced {
            (Backend::Software, Some(reason))
        } else {
            match config.backend {
                BackendPolicy::Software => (Backend::Software, Some(SoftwareReason::Requested)),
                BackendPolicy::Hardware | BackendPolicy::Auto if hardware_supported => {
                    (Backend::Hardware, None)
                }
                BackendPolicy::Hardware => {
                    if self.warnings.first(WarnCategory::HARDWARE_UNSUPPORTED) {
                        log::warn!("Hardware ray tracing requested but unsupported, using software");
                    }
                    (Backend::Software, Some(SoftwareReason::HardwareUnsupported))
                }
                BackendPolicy::Auto => {
                    (Backend::Software, Some(SoftwareReason::HardwareUnsupported))
                }
            }
        };

        if self.backend != Some(backend) || self.reason != reason {
            match reason {
                Some(reason) => log::info!("Tracing backend: {} ({})", backend, reason),
                None => log::info!("Tracing backend: {}", backend),
            }
            self.status = match reason {
                Some(reason) => format!("{} ({})", backend, reason),
                None => backend.to_string(),
            };
        }
        if self.enabled.is_some_and(|enabled| enabled != config.enable) {
            log::debug!("Tracer enable switched to {}", config.enable);
        }
        self.backend = Some(backend);
        self.reason = reason;
        self.enabled = Some(config.enable);
        backend
    }

    pub fn backend(&self) -> Option<Backend> {
        self.backend
    }

    pub fn reason(&self) -> Option<SoftwareReason> {
        self.reason
    }

    pub fn is_hardware_active(&self) -> bool {
        self.hardware_active
    }

    /// Mark the hardware backend as initialized. Returns `true` on the
    /// transition.
    pub fn init_hardware(&mut self) -> bool {
        if self.hardware_active {
            return false;
        }
        self.hardware_active = true;
        self.warnings.reset();
        true
    }

    /// Mark the hardware backend as shut down. Returns `true` on the
    /// transition.
    pub fn shutdown_hardware(&mut self) -> bool {
        if !self.hardware_active {
            return false;
        }
        self.hardware_active = false;
        self.warnings.reset();
        true
    }

    /// Keep using software until the next reconfiguration.
    pub fn force_software(&mut self, reason: SoftwareReason) {
        if self.forced != Some(reason) {
            log::warn!("Forcing the software backend: {}", reason);
        }
        self.forced = Some(reason);
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_some()
    }

    /// Forget forced fallbacks and reported warnings after the
    /// configuration changed.
    pub fn reconfigure(&mut self) {
        self.forced = None;
        self.warnings.reset();
    }

    /// One line naming the backend in use and why.
    pub fn status(&self) -> &str {
        &self.status
    }
}
