use super::flash_properties::FlashProperties;
use crate::serialize::hex_option;
use base64::{engine::general_purpose as base64_engine, Engine as _};
use serde::{Deserialize, Serialize};

/// The raw flash algorithm is the description of a flash algorithm,
/// and is usually supplied next to the description of a chip.
///
/// Before it can be used for flashing, it has to be assembled for
/// a specific RAM region. Assembling determines the RAM addresses
/// of the code, the stack and the page buffers used when flashing.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawFlashAlgorithm {
    /// The name of the flash algorithm.
    pub name: String,
    /// The description of the algorithm.
    #[serde(default)]
    pub description: String,
    /// Whether this flash algorithm is the default one or not.
    #[serde(default)]
    pub default: bool,
    /// The position-independent code of the algorithm, base64 encoded when serialized.
    #[serde(deserialize_with = "deserialize")]
    #[serde(serialize_with = "serialize")]
    pub instructions: Vec<u8>,
    /// Address to load the algorithm code to. If not set, the algorithm is
    /// assumed to be position independent and is loaded to the start of RAM.
    #[serde(default, serialize_with = "hex_option")]
    pub load_address: Option<u64>,
    /// Offset of the `Init()` entry point. Optional.
    #[serde(default, serialize_with = "hex_option")]
    pub pc_init: Option<u64>,
    /// Offset of the `UnInit()` entry point. Optional.
    #[serde(default, serialize_with = "hex_option")]
    pub pc_uninit: Option<u64>,
    /// Offset of the `ProgramPage()` entry point.
    pub pc_program_page: u64,
    /// Offset of the `EraseSector()` entry point.
    pub pc_erase_sector: u64,
    /// The offset from the start of the code to the data section.
    pub data_section_offset: u64,
    /// The stack size the algorithm requires, in bytes.
    #[serde(default)]
    pub stack_size: Option<u32>,
    /// The properties of the flash on the device.
    pub flash_properties: FlashProperties,
}

fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&base64_engine::STANDARD.encode(bytes))
}

fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Base64Visitor;

    impl<'de> serde::de::Visitor<'de> for Base64Visitor {
        type Value = Vec<u8>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(formatter, "base64 ASCII text")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            base64_engine::STANDARD
                .decode(v)
                .map_err(serde::de::Error::custom)
        }
    }

    deserializer.deserialize_str(Base64Visitor)
}

#[cfg(test)]
mod test {
    use super::RawFlashAlgorithm;
    use pretty_assertions::assert_eq;

    const ALGORITHM: &str = r#"
name: test-flash
description: Flash algorithm used in tests
default: true
instructions: AAECAwQFBgc=
pc_init: 1
pc_uninit: 0x21
pc_program_page: 0x41
pc_erase_sector: 0x61
data_section_offset: 0x80
flash_properties:
  address_range:
    start: 0x08000000
    end: 0x08010000
  page_size: 0x400
  erased_byte_value: 0xff
  program_page_timeout: 100
  erase_sector_timeout: 1000
  sectors:
    - size: 0x1000
      address: 0x0
"#;

    #[test]
    fn deserialize_algorithm() {
        let raw: RawFlashAlgorithm = serde_yaml::from_str(ALGORITHM).unwrap();

        assert_eq!(raw.instructions, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(raw.pc_init, Some(1));
        assert_eq!(raw.pc_uninit, Some(0x21));
        assert_eq!(raw.load_address, None);
        assert_eq!(raw.flash_properties.address_range, 0x800_0000..0x801_0000);
        assert_eq!(raw.flash_properties.sectors[0].size, 0x1000);
    }

    #[test]
    fn serialize_uses_base64_and_hex() {
        let raw: RawFlashAlgorithm = serde_yaml::from_str(ALGORITHM).unwrap();
        let yaml = serde_yaml::to_string(&raw).unwrap();

        assert!(yaml.contains("AAECAwQFBgc="));
        assert!(yaml.contains("0x400"));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let broken = ALGORITHM.replace("AAECAwQFBgc=", "not base64!");
        assert!(serde_yaml::from_str::<RawFlashAlgorithm>(&broken).is_err());
    }
}
