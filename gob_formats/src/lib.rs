pub mod adl;
pub mod anim;
pub mod ext;
pub mod infogrames;
pub mod lz;
pub mod mult;
pub mod reader;
pub mod rle;
pub mod sample;
pub mod stk;
pub mod tot;

pub use adl::{AdlFile, AdlInstrument};
pub use anim::{AnimLayers, FrameMetrics};
pub use ext::ExtTable;
pub use infogrames::{InfogramesInstruments, InfogramesSong};
pub use mult::MultData;
pub use reader::{ByteReader, ReadError};
pub use sample::SampleHeader;
pub use stk::{StkArchive, StkEntry};
pub use tot::{ResourceLocation, ResourceTable, TextTable, TotHeader};
