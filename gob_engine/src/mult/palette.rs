//! Palette keys: colour chases along substitution lists.

use gob_formats::mult::{PalKey, Rgb, PAL_CHANNELS};

use crate::video::PALETTE_SIZE;

pub type Palette = [Rgb; PALETTE_SIZE];

/// Rotates the colours named by one channel of `key` one step: each entry
/// takes the colour of the next, the last takes the first's. Entries are
/// 1-based and a zero ends the list.
pub fn chase(palette: &mut Palette, key: &PalKey, channel: usize) -> bool {
    let chain: Vec<usize> = key
        .subst
        .iter()
        .map(|step| step[channel])
        .take_while(|&entry| entry != 0)
        .map(|entry| entry as usize - 1)
        .filter(|&index| index < PALETTE_SIZE)
        .collect();
    let Some(&head) = chain.first() else {
        return false;
    };
    let first = palette[head];
    for pair in chain.windows(2) {
        palette[pair[0]] = palette[pair[1]];
    }
    if let Some(&tail) = chain.last() {
        palette[tail] = first;
    }
    true
}

#[derive(Debug, Clone, Default)]
pub struct PaletteAnimator {
    key: Option<PalKey>,
    saved: Option<Box<Palette>>,
}

impl PaletteAnimator {
    pub fn is_active(&self) -> bool {
        self.key.is_some()
    }

    /// Forgets any chase and remembers `palette` as the one to restore.
    pub fn reset(&mut self, palette: &Palette) {
        self.key = None;
        self.saved = Some(Box::new(*palette));
    }

    /// Applies a palette key. Command `-1` ends the chase and returns the
    /// palette to restore.
    pub fn apply_key(&mut self, key: &PalKey, palette: &Palette) -> Option<Palette> {
        if key.cmd == -1 {
            self.key = None;
            return self.saved.as_deref().copied();
        }
        if self.saved.is_none() {
            self.saved = Some(Box::new(*palette));
        }
        self.key = Some(*key);
        None
    }

    /// Steps every channel whose rate divides `frame`.
    pub fn step(&self, frame: i16, palette: &mut Palette) -> bool {
        let Some(key) = &self.key else {
            return false;
        };
        let mut changed = false;
        for channel in 0..PAL_CHANNELS {
            let rate = key.rates[channel];
            if rate <= 0 || frame % rate != 0 {
                continue;
            }
            changed |= chase(palette, key, channel);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray(level: u8) -> Rgb {
        Rgb {
            red: level,
            green: level,
            blue: level,
        }
    }

    fn key(rates: [i16; 4], chain: &[u8]) -> PalKey {
        let mut subst = [[0u8; PAL_CHANNELS]; 16];
        for (step, &entry) in chain.iter().enumerate() {
            subst[step][0] = entry;
        }
        PalKey {
            frame: 0,
            cmd: 0,
            rates,
            unknown: [0; 2],
            subst,
        }
    }

    #[test]
    fn chase_rotates_the_listed_entries() {
        let mut palette = [Rgb::default(); PALETTE_SIZE];
        for i in 0..5 {
            palette[i] = gray(i as u8 * 10);
        }
        // entries 2, 3, 5 (1-based) are indices 1, 2, 4
        assert!(chase(&mut palette, &key([1, 0, 0, 0], &[2, 3, 5]), 0));
        assert_eq!(palette[1], gray(20));
        assert_eq!(palette[2], gray(40));
        assert_eq!(palette[4], gray(10));
        assert_eq!(palette[3], gray(30));
    }

    #[test]
    fn rates_gate_the_steps_and_cmd_minus_one_restores() {
        let mut palette = [Rgb::default(); PALETTE_SIZE];
        palette[0] = gray(1);
        palette[1] = gray(2);
        let original = palette;
        let mut animator = PaletteAnimator::default();
        animator.reset(&palette);
        assert!(animator.apply_key(&key([2, 0, 0, 0], &[1, 2]), &palette).is_none());

        assert!(!animator.step(3, &mut palette));
        assert!(animator.step(4, &mut palette));
        assert_eq!(palette[0], gray(2));

        let mut stop = key([0; 4], &[]);
        stop.cmd = -1;
        assert_eq!(animator.apply_key(&stop, &palette), Some(original));
        assert!(!animator.is_active());
    }
}
