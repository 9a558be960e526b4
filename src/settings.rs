//! Device configuration payload and its fixed binary layout.
//!
//! The payload is encoded field by field instead of relying on a native struct layout so the
//! on-flash format stays stable:
//!
//! ```text
//!  0      brightness
//!  1      contrast
//!  2      squelch level
//!  3      vox level
//!  4      utc timezone (i8, half hours)
//!  5      gps enabled
//!  6..16  callsign, NUL padded
//!  16     bits 0-3 display timer, bits 4-7 M17 CAN
//!  17     bits 0-2 voice prompt level, bit 3 phonetic spell, bit 4 macro menu latch
//!  18     M17 CAN check on RX
//!  19..29 M17 destination, NUL padded
//!  29     show battery icon
//!  30     set RTC from GPS
//! ```

use crate::error::Error;
use core::fmt;

pub const CALLSIGN_LENGTH: usize = 10;

/// Encoded size of [`Settings`] in bytes.
pub const SETTINGS_SIZE: usize = 31;

const CALLSIGN_OFFSET: usize = 6;
const TIMER_CAN_OFFSET: usize = 16;
const VOICE_PROMPT_OFFSET: usize = 17;
const M17_CAN_RX_OFFSET: usize = 18;
const M17_DEST_OFFSET: usize = 19;
const BATTERY_ICON_OFFSET: usize = 29;
const GPS_SET_TIME_OFFSET: usize = 30;

const VP_LEVEL_MASK: u8 = 0b0000_0111;
const VP_PHONETIC_BIT: u8 = 1 << 3;
const MACRO_LATCH_BIT: u8 = 1 << 4;

/// Standby timer of the display. Occupies four bits, every value is a valid timer.
#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DisplayTimer {
    Off = 0,
    S5 = 1,
    S10 = 2,
    S15 = 3,
    S20 = 4,
    S25 = 5,
    S30 = 6,
    M1 = 7,
    M2 = 8,
    M3 = 9,
    M4 = 10,
    M5 = 11,
    M15 = 12,
    M30 = 13,
    M45 = 14,
    H1 = 15,
}

/// A callsign or M17 destination, up to 10 bytes, NUL padded.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Callsign([u8; CALLSIGN_LENGTH]);

impl Callsign {
    pub const fn empty() -> Self {
        Self([0u8; CALLSIGN_LENGTH])
    }

    pub fn from_str(s: &str) -> Result<Self, Error> {
        let bytes = s.as_bytes();
        if bytes.len() > CALLSIGN_LENGTH {
            return Err(Error::InvalidArgument);
        }

        let mut dst = [0u8; CALLSIGN_LENGTH];
        dst[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(dst))
    }

    pub const fn from_raw(raw: [u8; CALLSIGN_LENGTH]) -> Self {
        Self(raw)
    }

    pub const fn as_bytes(&self) -> &[u8; CALLSIGN_LENGTH] {
        &self.0
    }

    /// Text up to the first NUL byte, `None` if that is not valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(CALLSIGN_LENGTH);
        core::str::from_utf8(&self.0[..end]).ok()
    }
}

impl fmt::Debug for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callsign(b\"")?;
        for &byte in &self.0 {
            if byte == 0 {
                break;
            }
            write!(f, "{}", core::ascii::escape_default(byte))?;
        }
        write!(f, "\")")
    }
}

/// Device settings persisted by [`SettingsStorage`](crate::SettingsStorage).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    pub brightness: u8,
    pub contrast: u8,
    pub squelch_level: u8,
    pub vox_level: u8,
    /// Timezone in units of half hours.
    pub utc_timezone: i8,
    pub gps_enabled: bool,
    pub callsign: Callsign,
    pub display_timer: DisplayTimer,
    /// M17 channel access number, 4 bits.
    pub m17_can: u8,
    /// Voice prompt level, 3 bits.
    pub voice_prompt_level: u8,
    pub phonetic_spell: bool,
    pub macro_menu_latch: bool,
    pub m17_can_rx: bool,
    pub m17_dest: Callsign,
    /// `true` shows a battery icon, `false` the charge percentage.
    pub show_battery_icon: bool,
    pub gps_set_time: bool,
}

impl Settings {
    pub const DEFAULT: Settings = Settings {
        brightness: 100,
        contrast: 255,
        squelch_level: 4,
        vox_level: 0,
        utc_timezone: 0,
        gps_enabled: false,
        callsign: Callsign::empty(),
        display_timer: DisplayTimer::S30,
        m17_can: 0,
        voice_prompt_level: 0,
        phonetic_spell: false,
        macro_menu_latch: true,
        m17_can_rx: false,
        m17_dest: Callsign::empty(),
        show_battery_icon: false,
        gps_set_time: false,
    };

    /// Encodes the settings. Out of range bit field values are truncated to their field width.
    pub fn to_bytes(&self) -> [u8; SETTINGS_SIZE] {
        let mut buf = [0u8; SETTINGS_SIZE];
        buf[0] = self.brightness;
        buf[1] = self.contrast;
        buf[2] = self.squelch_level;
        buf[3] = self.vox_level;
        buf[4] = self.utc_timezone.cast_unsigned();
        buf[5] = self.gps_enabled as u8;
        buf[CALLSIGN_OFFSET..CALLSIGN_OFFSET + CALLSIGN_LENGTH]
            .copy_from_slice(self.callsign.as_bytes());
        buf[TIMER_CAN_OFFSET] = (self.display_timer as u8 & 0x0F) | ((self.m17_can & 0x0F) << 4);

        let mut vp = self.voice_prompt_level & VP_LEVEL_MASK;
        if self.phonetic_spell {
            vp |= VP_PHONETIC_BIT;
        }
        if self.macro_menu_latch {
            vp |= MACRO_LATCH_BIT;
        }
        buf[VOICE_PROMPT_OFFSET] = vp;

        buf[M17_CAN_RX_OFFSET] = self.m17_can_rx as u8;
        buf[M17_DEST_OFFSET..M17_DEST_OFFSET + CALLSIGN_LENGTH]
            .copy_from_slice(self.m17_dest.as_bytes());
        buf[BATTERY_ICON_OFFSET] = self.show_battery_icon as u8;
        buf[GPS_SET_TIME_OFFSET] = self.gps_set_time as u8;
        buf
    }

    /// Decodes settings. Every byte pattern decodes, reserved bits are ignored.
    pub fn from_bytes(buf: &[u8; SETTINGS_SIZE]) -> Self {
        let mut callsign = [0u8; CALLSIGN_LENGTH];
        callsign.copy_from_slice(&buf[CALLSIGN_OFFSET..CALLSIGN_OFFSET + CALLSIGN_LENGTH]);
        let mut m17_dest = [0u8; CALLSIGN_LENGTH];
        m17_dest.copy_from_slice(&buf[M17_DEST_OFFSET..M17_DEST_OFFSET + CALLSIGN_LENGTH]);

        let timer_can = buf[TIMER_CAN_OFFSET];
        let vp = buf[VOICE_PROMPT_OFFSET];

        Self {
            brightness: buf[0],
            contrast: buf[1],
            squelch_level: buf[2],
            vox_level: buf[3],
            utc_timezone: buf[4].cast_signed(),
            gps_enabled: buf[5] != 0,
            callsign: Callsign::from_raw(callsign),
            // all 16 values of the nibble are variants
            display_timer: DisplayTimer::from_repr(timer_can & 0x0F).unwrap_or(DisplayTimer::Off),
            m17_can: timer_can >> 4,
            voice_prompt_level: vp & VP_LEVEL_MASK,
            phonetic_spell: vp & VP_PHONETIC_BIT != 0,
            macro_menu_latch: vp & MACRO_LATCH_BIT != 0,
            m17_can_rx: buf[M17_CAN_RX_OFFSET] != 0,
            m17_dest: Callsign::from_raw(m17_dest),
            show_battery_icon: buf[BATTERY_ICON_OFFSET] != 0,
            gps_set_time: buf[GPS_SET_TIME_OFFSET] != 0,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let raw = Settings::DEFAULT.to_bytes();
        assert_eq!(raw[0], 100);
        assert_eq!(raw[1], 255);
        assert_eq!(raw[2], 4);
        assert_eq!(raw[CALLSIGN_OFFSET..CALLSIGN_OFFSET + CALLSIGN_LENGTH], [0u8; 10]);
        // 30 s timer, CAN 0
        assert_eq!(raw[TIMER_CAN_OFFSET], 0x06);
        // macro menu latch only
        assert_eq!(raw[VOICE_PROMPT_OFFSET], 0x10);
    }

    #[test]
    fn bit_fields() {
        let settings = Settings {
            display_timer: DisplayTimer::H1,
            m17_can: 0xA,
            voice_prompt_level: 5,
            phonetic_spell: true,
            macro_menu_latch: false,
            utc_timezone: -4,
            callsign: Callsign::from_str("IU2KWO").unwrap(),
            ..Settings::DEFAULT
        };

        let raw = settings.to_bytes();
        assert_eq!(raw[TIMER_CAN_OFFSET], 0xAF);
        assert_eq!(raw[VOICE_PROMPT_OFFSET], 0b0000_1101);
        assert_eq!(raw[4], 0xFC);
        assert_eq!(&raw[CALLSIGN_OFFSET..CALLSIGN_OFFSET + 6], b"IU2KWO");

        assert_eq!(Settings::from_bytes(&raw), settings);
    }

    #[test]
    fn reserved_bits_are_ignored() {
        let mut raw = Settings::DEFAULT.to_bytes();
        raw[VOICE_PROMPT_OFFSET] |= 0b1110_0000;
        assert_eq!(Settings::from_bytes(&raw), Settings::DEFAULT);
    }

    #[test]
    fn callsign_too_long() {
        assert_eq!(
            Callsign::from_str("ABCDEFGHIJK"),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            Callsign::from_str("ABCDEFGHIJ").unwrap().as_str(),
            Some("ABCDEFGHIJ")
        );
    }
}
