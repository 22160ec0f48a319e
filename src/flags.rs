use anyhow::{bail, Context};

use crate::modify::Modification;

/// Compact modification flags such as `t-3g20B40`.
///
/// `t` transposes by semitones, `g` shifts formants in tenths of a
/// semitone and `B` sets breathiness from 0 to 100. Letters are case
/// insensitive; `/` separators and unknown letters are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Flags {
    pub transpose: f64,
    pub gender: f64,
    pub breathiness: f64,
}

impl std::str::FromStr for Flags {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Flags::default();
        let chars: Vec<char> = s.chars().filter(|&c| c != '/').collect();

        let mut i = 0;
        while i < chars.len() {
            let flag = chars[i];
            let mut end = i + 1;
            while end < chars.len()
                && (chars[end].is_ascii_digit() || chars[end] == '-' || chars[end] == '.')
            {
                end += 1;
            }
            let target = match flag {
                't' | 'T' => &mut flags.transpose,
                'g' | 'G' => &mut flags.gender,
                'b' | 'B' => &mut flags.breathiness,
                _ => {
                    i += 1;
                    continue;
                }
            };
            let value: String = chars[i + 1..end].iter().collect();
            *target = value
                .parse::<f64>()
                .with_context(|| format!("Invalid value '{}' for flag '{}'", value, flag))?;
            i = end;
        }

        if !(0.0..=100.0).contains(&flags.breathiness) {
            bail!("Breathiness must be within 0..100, got {}", flags.breathiness);
        }
        Ok(flags)
    }
}

impl From<Flags> for Modification {
    fn from(flags: Flags) -> Self {
        Modification {
            transpose_semitones: flags.transpose,
            formant_shift: flags.gender,
            breathiness: flags.breathiness / 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_flags() {
        let flags: Flags = "t-3g20B40".parse().unwrap();
        assert_eq!(
            flags,
            Flags {
                transpose: -3.0,
                gender: 20.0,
                breathiness: 40.0
            }
        );
        let modification = Modification::from(flags);
        assert_eq!(modification.breathiness, 0.4);
    }

    #[test]
    fn test_separators_and_unknown_letters() {
        let flags: Flags = "G-5/x/t1.5".parse().unwrap();
        assert_eq!(flags.gender, -5.0);
        assert_eq!(flags.transpose, 1.5);
        assert_eq!(flags.breathiness, 0.0);
    }

    #[test]
    fn test_empty_is_identity() {
        let flags: Flags = "".parse().unwrap();
        assert!(Modification::from(flags).is_identity());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!("g".parse::<Flags>().is_err());
        assert!("t1-2".parse::<Flags>().is_err());
        assert!("B150".parse::<Flags>().is_err());
    }
}
