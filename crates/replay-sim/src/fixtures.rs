//! Fixture files: one firmware, a run id and the testcases recorded on it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use havoc_debug_proto::SessionKey;
use serde::Deserialize;

use crate::error::FixtureError;
use crate::memory::RegionSpec;
use crate::program::{Program, Reg};
use crate::recording::{Firmware, Recording};

const DEMO_FIXTURE: &str = include_str!("../fixtures/demo.toml");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FixtureFile {
    project: String,
    run_id: u64,
    entry: u32,
    #[serde(default)]
    instruction_limit: Option<u64>,
    program: String,
    #[serde(default)]
    registers: BTreeMap<String, u32>,
    memory: Vec<RegionSpec>,
    #[serde(default)]
    image: Vec<ImageSpec>,
    #[serde(default)]
    testcase: Vec<TestcaseSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageSpec {
    address: u32,
    bytes: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestcaseSpec {
    id: String,
    #[serde(default)]
    input: String,
}

#[derive(Debug, Clone)]
pub struct Fixture {
    pub project: String,
    pub run_id: u64,
    firmware: Arc<Firmware>,
    testcases: Vec<(String, Arc<[u8]>)>,
}

impl Fixture {
    /// Built-in firmware served by `havoc-dbg serve` and used by the tests.
    pub fn demo() -> Result<Self, FixtureError> {
        Self::from_toml_str(DEMO_FIXTURE)
    }

    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let raw = std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, FixtureError> {
        let file: FixtureFile = toml::from_str(raw)?;
        if file.project.trim().is_empty() {
            return Err(FixtureError::Invalid("project name cannot be empty".into()));
        }

        let program = Program::assemble(&file.program)?;
        let mut firmware = Firmware::new(&file.memory, program, file.entry)?;
        for (name, value) in &file.registers {
            let reg: Reg = name.parse()?;
            firmware = firmware.with_register(reg, *value);
        }
        for image in &file.image {
            let bytes = decode_hex(&image.bytes, || format!("image at {:#010x}", image.address))?;
            firmware = firmware.with_image(image.address, &bytes)?;
        }
        if let Some(limit) = file.instruction_limit {
            firmware = firmware.with_instruction_limit(limit);
        }

        let mut testcases: Vec<(String, Arc<[u8]>)> = Vec::with_capacity(file.testcase.len());
        for testcase in file.testcase {
            if testcases.iter().any(|(id, _)| *id == testcase.id) {
                return Err(FixtureError::Invalid(format!(
                    "testcase {} listed twice",
                    testcase.id
                )));
            }
            let input = decode_hex(&testcase.input, || format!("testcase {}", testcase.id))?;
            testcases.push((testcase.id, input.into()));
        }

        Ok(Self {
            project: file.project,
            run_id: file.run_id,
            firmware: Arc::new(firmware),
            testcases,
        })
    }

    pub fn firmware(&self) -> &Firmware {
        &self.firmware
    }

    pub fn testcase_ids(&self) -> impl Iterator<Item = &str> {
        self.testcases.iter().map(|(id, _)| id.as_str())
    }

    pub fn recording(&self, testcase_id: &str) -> Option<Recording> {
        self.testcases
            .iter()
            .find(|(id, _)| id == testcase_id)
            .map(|(_, input)| Recording::new(Arc::clone(&self.firmware), Arc::clone(input)))
    }

    pub fn recordings(&self) -> impl Iterator<Item = (SessionKey, Recording)> + '_ {
        self.testcases.iter().map(|(id, input)| {
            (
                SessionKey::new(self.project.clone(), self.run_id, id.clone()),
                Recording::new(Arc::clone(&self.firmware), Arc::clone(input)),
            )
        })
    }
}

fn decode_hex(raw: &str, field: impl FnOnce() -> String) -> Result<Vec<u8>, FixtureError> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(cleaned).map_err(|source| FixtureError::Hex {
        field: field(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_fixture_loads() {
        let fixture = Fixture::demo().unwrap();
        assert_eq!(fixture.project, "demo");
        assert_eq!(fixture.run_id, 1);
        assert_eq!(
            fixture.testcase_ids().collect::<Vec<_>>(),
            vec!["jump_invalid", "clean_exit", "short_input"]
        );
        assert_eq!(fixture.firmware().entry, 0x40_0100);
        assert_eq!(fixture.firmware().program.len(), 19);
        assert_eq!(fixture.recording("clean_exit").unwrap().input(), &[0x7f, 0, 0, 0]);
        assert!(fixture.recording("missing").is_none());
    }

    #[test]
    fn minimal_fixture_with_spaced_hex() {
        let fixture = Fixture::from_toml_str(
            r#"
            project = "tiny"
            run_id = 7
            entry = 0x1000
            instruction_limit = 10
            program = "0x1000: halt"

            [[memory]]
            base_addr = 0x1000
            size = 0x100
            memory_type = "rom"
            fill = 0xff

            [[testcase]]
            id = "only"
            input = "01 02 03 04"
            "#,
        )
        .unwrap();
        assert_eq!(fixture.firmware().instruction_limit, 10);
        assert_eq!(fixture.firmware().memory.read(0x1000, 2).unwrap(), vec![0xff, 0xff]);
        let (key, recording) = fixture.recordings().next().unwrap();
        assert_eq!(key, SessionKey::new("tiny", 7, "only"));
        assert_eq!(recording.input(), &[1, 2, 3, 4]);
    }

    #[test]
    fn bad_fixtures_explain_themselves() {
        let err = Fixture::from_toml_str(
            r#"
            project = "tiny"
            run_id = 1
            entry = 0x1000
            program = "0x1000: jump r0"
            memory = []
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FixtureError::Assembly(_)));

        let err = Fixture::from_toml_str(
            r#"
            project = "tiny"
            run_id = 1
            entry = 0x1000
            program = "0x1000: halt"
            memory = []
            [registers]
            r42 = 1
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FixtureError::Register(_)));

        let err = Fixture::from_toml_str(
            r#"
            project = "tiny"
            run_id = 1
            entry = 0x1000
            program = "0x1000: halt"
            memory = []
            [[testcase]]
            id = "a"
            input = "zz"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FixtureError::Hex { .. }));
    }
}
