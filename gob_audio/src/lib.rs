pub mod adlib;
pub mod error;
pub mod imuse;
pub mod infogrames;
pub mod mixer;
pub mod opl;
pub mod paula;
pub mod sample;
pub mod speaker;
pub mod stream;

pub use adlib::AdLibPlayer;
pub use error::{AudioError, Result};
pub use imuse::{IMuse, IMuseConfig, MidiDriver, RecordingMidiDriver};
pub use infogrames::InfogramesPlayer;
pub use mixer::{Mixer, SoundHandle, SoundKind};
pub use opl::{Opl, OplEmulator, OplEvent, RecordingOpl};
pub use paula::{Paula, PaulaInterrupt, PaulaStream};
pub use sample::{REPEAT_FOREVER, SampleStream};
pub use speaker::Speaker;
pub use stream::{AudioStream, SharedStream};
