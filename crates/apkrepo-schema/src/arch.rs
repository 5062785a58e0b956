/// Target CPU architecture of a repository partition.
///
/// Every architecture gets its own subdirectory under the repository root
/// holding the `.apk` files built for it and a single `APKINDEX.tar.gz`.
/// The string form matches the directory name and the value passed to
/// `apk index --rewrite-arch`.
///
/// # Example
///
/// ```
/// use apkrepo_schema::Arch;
///
/// let arch: Arch = "aarch64".parse().unwrap();
/// assert_eq!(arch.as_str(), "aarch64");
/// assert_eq!(arch.to_string(), "aarch64");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
    Default,
)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Arch {
    /// 32-bit Intel (`x86`)
    X86,
    /// 64-bit Intel/AMD (`x86_64`)
    #[default]
    X86_64,
    /// 64-bit ARM (`aarch64`)
    Aarch64,
    /// ARMv6 hard-float (`armhf`)
    Armhf,
    /// ARMv7 (`armv7`)
    Armv7,
    /// 64-bit MIPS (`mips64`)
    Mips64,
    /// 64-bit little-endian POWER (`ppc64le`)
    Ppc64le,
    /// IBM Z (`s390x`)
    S390x,
}

impl Arch {
    /// Every architecture the repository accepts, in canonical order.
    pub const ALL: [Self; 8] = [
        Self::X86,
        Self::X86_64,
        Self::Aarch64,
        Self::Armhf,
        Self::Armv7,
        Self::Mips64,
        Self::Ppc64le,
        Self::S390x,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
            Self::Armhf => "armhf",
            Self::Armv7 => "armv7",
            Self::Mips64 => "mips64",
            Self::Ppc64le => "ppc64le",
            Self::S390x => "s390x",
        }
    }

    /// Comma separated list of every accepted name, for error messages.
    pub fn options() -> String {
        Self::ALL
            .iter()
            .map(Self::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|arch| arch.as_str() == s)
            .ok_or_else(|| format!("Unknown architecture: {s} (options: {})", Self::options()))
    }
}

impl TryFrom<String> for Arch {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Arch> for &'static str {
    fn from(arch: Arch) -> Self {
        arch.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for arch in Arch::ALL {
            assert_eq!(arch.as_str().parse::<Arch>().unwrap(), arch);
        }
    }

    #[test]
    fn test_rejects_unknown_and_case_variants() {
        assert!("amd64".parse::<Arch>().is_err());
        assert!("X86_64".parse::<Arch>().is_err());
        let err = "riscv64".parse::<Arch>().unwrap_err();
        assert!(err.contains("ppc64le"));
    }

    #[test]
    fn test_default_is_x86_64() {
        assert_eq!(Arch::default(), Arch::X86_64);
    }

    #[test]
    fn test_serde_uses_directory_names() {
        let json = serde_json::to_string(&Arch::Armv7).unwrap();
        assert_eq!(json, "\"armv7\"");
        let back: Arch = serde_json::from_str("\"s390x\"").unwrap();
        assert_eq!(back, Arch::S390x);
        assert!(serde_json::from_str::<Arch>("\"sparc\"").is_err());
    }
}
