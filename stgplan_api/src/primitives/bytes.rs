use std::{fmt::Display, num::ParseIntError, str::FromStr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteCount(pub u64);

impl From<u64> for ByteCount {
    fn from(x: u64) -> Self {
        ByteCount(x)
    }
}

impl ByteCount {
    pub const KIB: u64 = 1 << 10;
    pub const MIB: u64 = 1 << 20;
    pub const GIB: u64 = 1 << 30;
    pub const TIB: u64 = 1 << 40;

    pub fn bytes(self) -> u64 {
        self.0
    }

    /// Renders the count with the largest binary unit that divides it
    /// exactly, e.g. `512 KiB`. Counts that are not a multiple of 1 KiB are
    /// rendered in bytes.
    pub fn to_human_readable(&self) -> String {
        match self.0.trailing_zeros() {
            _ if self.0 == 0 => "0 B".to_owned(),
            0..=9 => format!("{} B", self.0),
            10..=19 => format!("{} KiB", self.0 >> 10),
            20..=29 => format!("{} MiB", self.0 >> 20),
            30..=39 => format!("{} GiB", self.0 >> 30),
            _ => format!("{} TiB", self.0 >> 40),
        }
    }

    pub fn from_human_readable(mut s: &str) -> Result<Self, ParseIntError> {
        s = s.trim();
        let try_parse = |val: &str, shift: u8| Ok(Self(val.trim().parse::<u64>()? << shift));
        let s = s
            .strip_suffix("iB")
            .or_else(|| s.strip_suffix('B'))
            .unwrap_or(s);
        if let Some(p) = s.strip_suffix('K') {
            try_parse(p, 10)
        } else if let Some(p) = s.strip_suffix('M') {
            try_parse(p, 20)
        } else if let Some(p) = s.strip_suffix('G') {
            try_parse(p, 30)
        } else if let Some(p) = s.strip_suffix('T') {
            try_parse(p, 40)
        } else {
            try_parse(s, 0)
        }
    }
}

impl Display for ByteCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

impl FromStr for ByteCount {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_human_readable(s.trim())
    }
}

impl<'de> serde::Deserialize<'de> for ByteCount {
    fn deserialize<D>(deserializer: D) -> Result<ByteCount, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Size may be provided as a string (e.g. "512K") or as a pure number
        // (e.g. 524288). Serde forces a number when only digits are provided,
        // so we need to deserialize as a generic value and then check the type.
        let value = serde_yaml::Value::deserialize(deserializer)?;

        match value {
            serde_yaml::Value::String(s) => ByteCount::from_str(s.as_str())
                .map_err(|e| serde::de::Error::custom(format!("invalid byte count size: {e}"))),
            serde_yaml::Value::Number(n) => {
                let n = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("invalid byte count size, expected unsigned integer")
                })?;
                Ok(ByteCount(n))
            }
            _ => Err(serde::de::Error::custom("invalid byte count size")),
        }
    }
}

impl serde::Serialize for ByteCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}
