//! Conversion of raw request strings into declared scalar types

/// A scalar that can be read from a path segment, query value, header,
/// cookie or form field.
pub trait FromParam: Sized + Send + 'static {
    /// Name used in `type_error` messages.
    const TYPE_NAME: &'static str;

    /// Convert a raw string. The error is a human-readable reason.
    fn from_param(raw: &str) -> Result<Self, String>;

    /// Value to bind when the parameter is absent. `None` means absence is a
    /// `missing` issue.
    fn absent() -> Option<Self> {
        None
    }
}

/// Parse an integer literal the way request parameters are read: whitespace
/// is trimmed, a sign and a `0x`/`0o`/`0b` prefix are allowed, a leading `0`
/// marks octal, `_` may separate digits, and a trailing all-zero fraction
/// (`"5.00"`) is dropped.
fn parse_integer(raw: &str) -> Result<i128, String> {
    let invalid = || format!("invalid integer '{raw}'");

    let mut s = raw.trim();
    if let Some((whole, fraction)) = s.split_once('.') {
        if !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') {
            s = whole;
        }
    }

    let (negative, unsigned) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let lower = unsigned.to_ascii_lowercase();
    let (radix, digits, prefixed) = if let Some(d) = lower.strip_prefix("0x") {
        (16, d, true)
    } else if let Some(d) = lower.strip_prefix("0o") {
        (8, d, true)
    } else if let Some(d) = lower.strip_prefix("0b") {
        (2, d, true)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, &lower[1..], true)
    } else {
        (10, lower.as_str(), false)
    };

    // Separators sit between digits, or directly after a base prefix.
    if digits.ends_with('_') || digits.contains("__") || (!prefixed && digits.starts_with('_')) {
        return Err(invalid());
    }
    let digits = digits.replace('_', "");
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(invalid());
    }

    let magnitude = i128::from_str_radix(&digits, radix).map_err(|_| invalid())?;
    Ok(if negative { -magnitude } else { magnitude })
}

macro_rules! impl_from_param_int {
    ($($ty:ty),*) => {
        $(
            impl FromParam for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn from_param(raw: &str) -> Result<Self, String> {
                    let value = parse_integer(raw)?;
                    <$ty>::try_from(value)
                        .map_err(|_| format!("'{}' is out of range for {}", raw, stringify!($ty)))
                }
            }
        )*
    };
}

impl_from_param_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_from_param_float {
    ($($ty:ty),*) => {
        $(
            impl FromParam for $ty {
                const TYPE_NAME: &'static str = stringify!($ty);

                fn from_param(raw: &str) -> Result<Self, String> {
                    raw.trim()
                        .parse::<$ty>()
                        .map_err(|_| format!("invalid number '{raw}'"))
                }
            }
        )*
    };
}

impl_from_param_float!(f32, f64);

impl FromParam for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_param(raw: &str) -> Result<Self, String> {
        match raw.trim() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
            _ => Err(format!("invalid boolean '{raw}'")),
        }
    }
}

impl FromParam for String {
    const TYPE_NAME: &'static str = "string";

    fn from_param(raw: &str) -> Result<Self, String> {
        Ok(raw.to_string())
    }
}

impl<T: FromParam> FromParam for Option<T> {
    const TYPE_NAME: &'static str = T::TYPE_NAME;

    fn from_param(raw: &str) -> Result<Self, String> {
        T::from_param(raw).map(Some)
    }

    fn absent() -> Option<Self> {
        Some(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers() {
        assert_eq!(i32::from_param("5"), Ok(5));
        assert_eq!(i32::from_param("  -12 "), Ok(-12));
        assert_eq!(i64::from_param("+7"), Ok(7));
        assert_eq!(u8::from_param("0xff"), Ok(255));
        assert_eq!(u16::from_param("0o17"), Ok(15));
        assert_eq!(i8::from_param("-0b101"), Ok(-5));
        assert_eq!(i32::from_param("5.00"), Ok(5));
    }

    #[test]
    fn test_integer_rejections() {
        assert!(i32::from_param("abc").is_err());
        assert!(i32::from_param("5.5").is_err());
        assert!(i32::from_param("").is_err());
        assert!(i32::from_param("--1").is_err());
        assert!(u8::from_param("256").is_err());
        assert!(u32::from_param("-1").is_err());
        assert!(i8::from_param("0x").is_err());
    }

    #[test]
    fn test_leading_zero_and_separators() {
        assert_eq!(i32::from_param("010"), Ok(8));
        assert_eq!(i32::from_param("-017"), Ok(-15));
        assert_eq!(i32::from_param("0"), Ok(0));
        assert_eq!(i32::from_param("1_000"), Ok(1000));
        assert_eq!(u32::from_param("0x_ff_ff"), Ok(0xffff));
        assert_eq!(i32::from_param("0_7"), Ok(7));

        assert!(i32::from_param("08").is_err());
        assert!(i32::from_param("_1").is_err());
        assert!(i32::from_param("1_").is_err());
        assert!(i32::from_param("1__0").is_err());
        assert!(i32::from_param("0x_").is_err());
    }

    #[test]
    fn test_floats() {
        assert_eq!(f64::from_param("2.5"), Ok(2.5));
        assert_eq!(f32::from_param(" -1 "), Ok(-1.0));
        assert!(f64::from_param("two").is_err());
    }

    #[test]
    fn test_booleans() {
        for raw in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(bool::from_param(raw), Ok(true), "{raw}");
        }
        for raw in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(bool::from_param(raw), Ok(false), "{raw}");
        }
        assert!(bool::from_param("yes").is_err());
        assert!(bool::from_param("tRuE").is_err());
    }

    #[test]
    fn test_option_absence() {
        assert_eq!(<Option<i32>>::absent(), Some(None));
        assert_eq!(<i32>::absent(), None);
        assert_eq!(<Option<i32>>::from_param("3"), Ok(Some(3)));
        assert!(<Option<i32>>::from_param("x").is_err());
    }
}
