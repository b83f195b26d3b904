use serde::{Deserialize, Serialize};

// ---------- wcn_regs.yaml ----------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterMap {
    pub blocks: Vec<Block>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Module name of the block (snake_case), e.g. `pmu_apb`.
    pub name: String,
    /// Human-readable name used in logs, e.g. `PMU_APB`.
    pub display: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the block decodes the +0x1000 set / +0x2000 clear aliases.
    #[serde(default, skip_serializing_if = "is_false")]
    pub set_clear_alias: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registers: Vec<Register>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub name: String,
    pub offset: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Field>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub bit_offset: u8,
    #[serde(default = "default_bit_size")]
    pub bit_size: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_bit_size() -> u8 {
    1
}

fn is_false(value: &bool) -> bool {
    !*value
}
