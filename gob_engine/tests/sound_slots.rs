mod common;

use common::{assign, files_with, func_block, interpreter, load_sound, ProgramBuilder};
use gob_engine::sound::SoundSource;
use gob_engine::ScriptedHost;

/// Flags, 24-bit declared size (10), big-endian frequency, six PCM bytes.
const SAMPLE: [u8; 12] = [0x00, 0x00, 0x00, 0x0A, 0x2B, 0x11, 1, 2, 3, 4, 5, 6];

fn program(code: Vec<u8>) -> Vec<u8> {
    let mut builder = ProgramBuilder::new(64).place(0x68, &code);
    for filler in 0..5u8 {
        builder = builder.resource(&[filler]);
    }
    builder.resource(&SAMPLE).build()
}

#[test]
fn load_sound_reads_frequency_and_clamps_size() {
    let mut code = func_block(&[load_sound(2, 5)]);
    code.push(0);
    let files = files_with(&[
        ("main.tot", program(code)),
        ("other.dat", vec![1, 2, 3]),
        ("third.dat", vec![4]),
    ]);
    let mut interp = interpreter(files, ScriptedHost::new());
    assert!(interp.load_program("main.tot").unwrap());
    interp.call_sub(2).unwrap();

    let slot = interp.sound().slot(2).expect("slot 2 holds the sample");
    assert_eq!(slot.frequency, u16::from_be_bytes([SAMPLE[4], SAMPLE[5]]));
    assert_eq!(slot.size, 6);
    assert_eq!(slot.source, SoundSource::Program);
    assert_eq!(slot.pcm(), &[1, 2, 3, 4, 5, 6]);
}

#[test]
fn missing_sound_is_skipped_and_the_script_goes_on() {
    let mut code = func_block(&[load_sound(3, 40), assign(20, 1)]);
    code.push(0);
    let files = files_with(&[("main.tot", program(code))]);
    let mut interp = interpreter(files, ScriptedHost::new());
    assert!(interp.load_program("main.tot").unwrap());
    interp.call_sub(2).unwrap();

    assert!(interp.sound().slot(3).is_none());
    assert_eq!(interp.var(20), 1);
}
