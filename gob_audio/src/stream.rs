use std::sync::Arc;

use parking_lot::Mutex;

/// A source of signed 16-bit PCM pulled by the mixer.
///
/// Streams render at the rate they report; the mixer only accepts streams
/// whose rate matches its output rate, so resampling happens inside the
/// stream (see `SampleStream` and `Paula`).
pub trait AudioStream: Send {
    /// Fills `buffer` with samples (interleaved left/right for stereo
    /// streams) and returns how many were written. Writing fewer than
    /// requested is only allowed once `end_of_data` reports true.
    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize;

    fn is_stereo(&self) -> bool;

    fn rate(&self) -> u32;

    fn end_of_data(&self) -> bool {
        false
    }
}

/// Lets the game thread keep a handle on a stream the mixer is pulling.
pub struct SharedStream<S> {
    inner: Arc<Mutex<S>>,
    stereo: bool,
    rate: u32,
}

impl<S: AudioStream> SharedStream<S> {
    pub fn new(inner: Arc<Mutex<S>>) -> Self {
        let (stereo, rate) = {
            let guard = inner.lock();
            (guard.is_stereo(), guard.rate())
        };
        SharedStream {
            inner,
            stereo,
            rate,
        }
    }
}

impl<S: AudioStream> AudioStream for SharedStream<S> {
    fn read_buffer(&mut self, buffer: &mut [i16]) -> usize {
        self.inner.lock().read_buffer(buffer)
    }

    fn is_stereo(&self) -> bool {
        self.stereo
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn end_of_data(&self) -> bool {
        self.inner.lock().end_of_data()
    }
}
