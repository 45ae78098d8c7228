//! HTTP dates (RFC 2616 Section 3.3.1).
//!
//! Accepts IMF-fixdate, RFC 850 and asctime forms and converts to POSIX
//! seconds in UTC. No locale-sensitive routine is involved: month and day
//! names are matched as literal ASCII, which keeps parsing thread-safe.

const MONTHS: [&[u8; 3]; 12] = [
    b"Jan", b"Feb", b"Mar", b"Apr", b"May", b"Jun", b"Jul", b"Aug", b"Sep", b"Oct", b"Nov", b"Dec",
];

const DAYS_PER_MONTH: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

// cumulated number of days until beginning of month for non-leap years
const SUM_OF_DAYS: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

/// Parse an HTTP date in any of the three RFC 2616 forms.
///
/// ```not_rust
/// Wed, 09 Jun 2021 10:18:14 GMT    ; IMF-fixdate
/// Wednesday, 09-Jun-21 10:18:14    ; RFC 850
/// Wed Jun  9 10:18:14 2021         ; asctime()
/// ```
///
/// Years 00-69 map to 2000-2069, 70-99 to 1970-1999, years below 1970
/// clamp to 1970. Returns 0 on any parse failure; callers treat 0 as
/// "session cookie / unknown".
pub fn parse_http_date(s: &str) -> i64 {
    parse(s.as_bytes()).unwrap_or(0)
}

fn parse(s: &[u8]) -> Option<i64> {
    let mut sc = Scan { s, i: 0 };
    sc.skip_spaces();
    if sc.take_alpha().is_empty() {
        return None;
    }

    let (day, mon, year, hour, min, sec);

    if sc.eat(b',') {
        sc.skip_spaces();
        day = sc.take_number(2)?;
        if sc.eat(b'-') {
            // RFC 850: 09-Jun-21 or 09-Jun-2021
            mon = sc.take_month()?;
            sc.expect(b'-')?;
            year = sc.take_number(4)?;
        } else {
            // IMF-fixdate: 09 Jun 2021
            sc.skip_spaces();
            mon = sc.take_month()?;
            sc.skip_spaces();
            year = sc.take_number(4)?;
        }
        sc.skip_spaces();
        (hour, min, sec) = sc.take_time()?;
    } else {
        // asctime: Jun  9 10:18:14 2021
        sc.skip_spaces();
        mon = sc.take_month()?;
        sc.skip_spaces();
        day = sc.take_number(2)?;
        sc.skip_spaces();
        (hour, min, sec) = sc.take_time()?;
        sc.skip_spaces();
        year = sc.take_number(4)?;
    }

    let year = match year {
        0..=69 => year + 2000,
        70..=99 => year + 1900,
        y if y < 1970 => 1970,
        y => y,
    };

    let leap_year = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
    let leap_month = mon == 2 && leap_year;

    // no leap-second handling, but a literal :60 is accepted
    if !(1..=12).contains(&mon)
        || day < 1
        || day > DAYS_PER_MONTH[(mon - 1) as usize] + leap_month as i64
        || !(0..=23).contains(&hour)
        || !(0..=60).contains(&min)
        || !(0..=60).contains(&sec)
    {
        return None;
    }

    let mut days = 365 * (year - 1970) + leap_days(1970, year);
    days += SUM_OF_DAYS[(mon - 1) as usize] + (mon > 2 && leap_year) as i64;
    days += day - 1;

    Some(((days * 24 + hour) * 60 + min) * 60 + sec)
}

fn leap_days(y1: i64, y2: i64) -> i64 {
    let (y1, y2) = (y1 - 1, y2 - 1);
    (y2 / 4 - y1 / 4) - (y2 / 100 - y1 / 100) + (y2 / 400 - y1 / 400)
}

struct Scan<'a> {
    s: &'a [u8],
    i: usize,
}

impl Scan<'_> {
    fn skip_spaces(&mut self) {
        while self.s.get(self.i).is_some_and(|b| *b == b' ' || *b == b'\t') {
            self.i += 1;
        }
    }

    fn take_alpha(&mut self) -> &[u8] {
        let start = self.i;
        while self.s.get(self.i).is_some_and(u8::is_ascii_alphabetic) {
            self.i += 1;
        }
        &self.s[start..self.i]
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.s.get(self.i) == Some(&byte) {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        self.eat(byte).then_some(())
    }

    fn take_number(&mut self, max_digits: usize) -> Option<i64> {
        let start = self.i;
        while self.i - start < max_digits && self.s.get(self.i).is_some_and(u8::is_ascii_digit) {
            self.i += 1;
        }
        if self.i == start {
            return None;
        }
        let mut n = 0i64;
        for &b in &self.s[start..self.i] {
            n = n * 10 + (b - b'0') as i64;
        }
        Some(n)
    }

    fn take_month(&mut self) -> Option<i64> {
        let name = self.take_alpha();
        if name.len() != 3 {
            return None;
        }
        MONTHS
            .iter()
            .position(|m| m.eq_ignore_ascii_case(name))
            .map(|at| at as i64 + 1)
    }

    fn take_time(&mut self) -> Option<(i64, i64, i64)> {
        let hour = self.take_number(2)?;
        self.expect(b':')?;
        let min = self.take_number(2)?;
        self.expect(b':')?;
        let sec = self.take_number(2)?;
        Some((hour, min, sec))
    }
}

// ===== Printing =====

/// Print `t` as IMF-fixdate, e.g. `Sun, 02 Oct 2016 14:44:11 GMT`, using
/// fixed English month and day tables.
pub fn print_http_date(t: i64) -> String {
    let secs_since_epoch = t.max(0) as u64;

    /* 2000-03-01 (mod 400 year, immediately after feb29 */

    const LEAPOCH: i64 = 11017;
    const DAYS_PER_400Y: i64 = 365 * 400 + 97;
    const DAYS_PER_100Y: i64 = 365 * 100 + 24;
    const DAYS_PER_4Y: i64 = 365 * 4 + 1;

    let days = (secs_since_epoch / 86400) as i64 - LEAPOCH;
    let secs_of_day = secs_since_epoch % 86400;

    let mut qc_cycles = days / DAYS_PER_400Y;
    let mut remdays = days % DAYS_PER_400Y;

    if remdays < 0 {
        remdays += DAYS_PER_400Y;
        qc_cycles -= 1;
    }

    let mut c_cycles = remdays / DAYS_PER_100Y;
    if c_cycles == 4 {
        c_cycles -= 1;
    }
    remdays -= c_cycles * DAYS_PER_100Y;

    let mut q_cycles = remdays / DAYS_PER_4Y;
    if q_cycles == 25 {
        q_cycles -= 1;
    }
    remdays -= q_cycles * DAYS_PER_4Y;

    let mut remyears = remdays / 365;
    if remyears == 4 {
        remyears -= 1;
    }
    remdays -= remyears * 365;

    let mut year = 2000 + remyears + 4 * q_cycles + 100 * c_cycles + 400 * qc_cycles;

    // month lengths starting from March
    let months = [31, 30, 31, 30, 31, 31, 30, 31, 30, 31, 31, 29];
    let mut mon = 0;
    for mon_len in months.iter() {
        mon += 1;
        if remdays < *mon_len {
            break;
        }
        remdays -= *mon_len;
    }
    let mday = remdays + 1;
    let mon = if mon + 2 > 12 {
        year += 1;
        mon - 10
    } else {
        mon + 2
    };

    let mut wday = (3 + days) % 7;
    if wday <= 0 {
        wday += 7
    };
    let wday_name = match wday {
        1 => "Mon",
        2 => "Tue",
        3 => "Wed",
        4 => "Thu",
        5 => "Fri",
        6 => "Sat",
        _ => "Sun",
    };

    let mon_name = std::str::from_utf8(MONTHS[(mon - 1) as usize]).unwrap_or("Jan");
    let hour = secs_of_day / 3600;
    let min = (secs_of_day % 3600) / 60;
    let sec = secs_of_day % 60;

    format!("{wday_name}, {mday:02} {mon_name} {year:04} {hour:02}:{min:02}:{sec:02} GMT")
}

#[cfg(test)]
mod tests {
    use super::{parse_http_date, print_http_date};

    #[test]
    fn test_print() {
        assert_eq!(print_http_date(0), "Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(print_http_date(1475419451), "Sun, 02 Oct 2016 14:44:11 GMT");
    }

    #[test]
    fn test_parse_forms() {
        let t = 1623233894; // Wed, 09 Jun 2021 10:18:14 GMT
        assert_eq!(parse_http_date("Wed, 09 Jun 2021 10:18:14 GMT"), t);
        assert_eq!(parse_http_date("Wednesday, 09-Jun-21 10:18:14 GMT"), t);
        assert_eq!(parse_http_date("Wed, 09-Jun-2021 10:18:14 GMT"), t);
        assert_eq!(parse_http_date("Wed Jun  9 10:18:14 2021"), t);
    }

    #[test]
    fn test_year_windowing() {
        // 00-69 land in the 2000s, 70-99 in the 1900s
        assert_eq!(
            parse_http_date("Sat, 01-Jan-00 00:00:00 GMT"),
            parse_http_date("Sat, 01 Jan 2000 00:00:00 GMT")
        );
        assert_eq!(
            parse_http_date("Thu, 01-Jan-70 00:00:00 GMT"),
            0
        );
        // below 1970 clamps to 1970
        assert_eq!(parse_http_date("Wed, 01 Jan 1969 00:00:01 GMT"), 1);
    }

    #[test]
    fn test_parse_failure() {
        assert_eq!(parse_http_date(""), 0);
        assert_eq!(parse_http_date("not a date"), 0);
        assert_eq!(parse_http_date("Wed, 32 Jun 2021 10:18:14 GMT"), 0);
        assert_eq!(parse_http_date("Wed, 09 Jun 2021 24:18:14 GMT"), 0);
        assert_eq!(parse_http_date("Wed, 29 Feb 2021 00:00:00 GMT"), 0);
        assert_ne!(parse_http_date("Mon, 29 Feb 2016 00:00:00 GMT"), 0);
    }

    #[test]
    fn test_round_trip() {
        // sweep the 31-bit range with a coarse prime stride
        let mut t: i64 = 0;
        while t < i64::from(u32::MAX / 2) {
            assert_eq!(parse_http_date(&print_http_date(t)), t, "t={t}");
            t += 86_400 * 37 + 12_345;
        }
    }
}
