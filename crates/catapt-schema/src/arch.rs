use crate::SchemaError;

/// Processor architecture, spelled the way Debian spells it.
///
/// # Example
///
/// ```
/// use catapt_schema::Arch;
///
/// let arch: Arch = "x86_64".parse().unwrap();
/// assert_eq!(arch.as_str(), "amd64");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64-bit x86 (`x86_64`)
    Amd64,
    /// 64-bit ARM (`aarch64`)
    Arm64,
}

impl Arch {
    /// Architecture of the running process.
    pub fn current() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Self::Arm64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Self::Amd64
        }
    }

    /// Debian architecture name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }

    /// Directory name APT uses for this architecture's index (`binary-amd64`).
    pub fn binary_dir(&self) -> String {
        format!("binary-{}", self.as_str())
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "amd64" | "x86_64" => Ok(Self::Amd64),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            _ => Err(SchemaError::parse(format!("unknown architecture: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_rust_and_debian_spellings() {
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert_eq!("AMD64".parse::<Arch>().unwrap(), Arch::Amd64);
        assert!("riscv64".parse::<Arch>().is_err());
    }

    #[test]
    fn binary_dir_matches_apt_layout() {
        assert_eq!(Arch::Arm64.binary_dir(), "binary-arm64");
    }
}
