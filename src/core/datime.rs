//! Packed date/time stamps stored in keys and directory records

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Date and time packed into 32 bits, with a 1995 epoch
///
/// ```text
/// bits 26..32  year - 1995
/// bits 22..26  month (1-12)
/// bits 17..22  day   (1-31)
/// bits 12..17  hour
/// bits  6..12  minute
/// bits  0..6   second
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Datime(pub u32);

impl Datime {
    pub fn now() -> Self {
        Datime::from_datetime(&Utc::now().naive_utc())
    }

    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        let year = (dt.year() - 1995).clamp(0, 63) as u32;
        Datime(
            year << 26
                | dt.month() << 22
                | dt.day() << 17
                | dt.hour() << 12
                | dt.minute() << 6
                | dt.second(),
        )
    }

    /// Unpacked value, or `None` if the fields do not form a valid date
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let v = self.0;
        let year = (v >> 26) as i32 + 1995;
        let month = (v >> 22) & 0xF;
        let day = (v >> 17) & 0x1F;
        let hour = (v >> 12) & 0x1F;
        let minute = (v >> 6) & 0x3F;
        let second = v & 0x3F;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let dt = NaiveDate::from_ymd_opt(2017, 3, 14)
            .unwrap()
            .and_hms_opt(15, 9, 26)
            .unwrap();
        let d = Datime::from_datetime(&dt);
        assert_eq!(d.0 >> 26, 22);
        assert_eq!(d.to_datetime(), Some(dt));
    }

    #[test]
    fn test_zero_is_not_a_date() {
        assert_eq!(Datime(0).to_datetime(), None);
    }
}
