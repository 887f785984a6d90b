//! Interpreter core for Gob-style adventure games: program loading and
//! nesting, the bytecode VM, hotspots, the Mult sequencer and the sound
//! glue over `gob_audio`.

pub mod collision;
pub mod config;
pub mod context;
pub mod data_io;
pub mod error;
pub mod expr;
pub mod input;
pub mod interp;
pub mod mult;
pub mod sound;
pub mod variables;
pub mod video;

pub use config::{EngineVersion, GameRules};
pub use data_io::DataCollection;
pub use error::{EngineError, Result};
pub use input::{Host, InputEvent, ScriptedHost};
pub use interp::{CallbackKind, ExecObserver, Interpreter, Terminate};
