//! Call Engine Module - Audio-Bridge und Call-Steuerung
//!
//! Dieses Modul verwaltet:
//! - Audio Capture/Render über die Hardware-Bridge
//! - Media-Ports zum Signaling-Client
//! - Die Call-State-Machine und ihre Control-Queue

mod actor;
mod audio;
mod device;
mod engine;
mod media;

pub use actor::{CallCommand, CallControl};
pub use audio::{
    AudioFormat, AudioHardwareBridge, BridgeStats, CallbackHooks, ConfigurationStep,
    HardwareConfigurationError, OutputRoute, CHANNELS, FRAMES_PER_BUFFER, SAMPLE_RATE,
    SAMPLE_SIZE,
};
pub use device::{CpalDevice, DeviceClock, DeviceKind, FaultInjector, HardwareDevice, SilenceDevice};
pub use engine::{
    CallEngineError, CallSnapshot, CallState, Credentials, EngineParts, MakeCallRequest,
};
pub use media::{media_pair, DeviceMediaPort, NetworkMediaPort};
