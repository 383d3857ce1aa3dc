use super::{Formula, CLAUSE_WIDTH};

/// Clause slots available on the device.
pub const MAX_CLAUSES: usize = 228;
/// Marks a populated slot.
pub const ENABLE_BIT: u32 = 50;
/// Set when the packed literal is positive.
pub const POLARITY_BIT: u32 = 51;

/// Three parallel slot arrays, one per literal position within a clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedProblem {
    slots: [Vec<u64>; CLAUSE_WIDTH],
}

impl Default for EncodedProblem {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| vec![0; MAX_CLAUSES]),
        }
    }
}

/// One serialized half-array: the low or high 32 bits of every slot of one
/// literal position, ready to be written as `data_info_<position><half>.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInfoFile {
    pub position: usize,
    /// 1 for the low 32 bits, 2 for the high 32 bits
    pub half: u8,
    pub values: Vec<u32>,
}

impl DataInfoFile {
    pub fn file_name(&self) -> String {
        format!("data_info_{}{}.csv", self.position, self.half)
    }

    /// One decimal value per line.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.values.len() * 11);
        for value in &self.values {
            out.push_str(&value.to_string());
            out.push('\n');
        }
        out
    }
}

impl EncodedProblem {
    /// Slots for literal position `position` (0, 1 or 2).
    pub fn position(&self, position: usize) -> &[u64] {
        &self.slots[position]
    }

    pub fn slot(&self, clause: usize, position: usize) -> u64 {
        self.slots[position][clause]
    }

    /// Split every slot into its low and high 32-bit halves.
    ///
    /// Order is position 0 low, position 0 high, position 1 low, ... so the
    /// result always holds six files of [`MAX_CLAUSES`] values each.
    pub fn serialize(&self) -> Vec<DataInfoFile> {
        let mut files = Vec::with_capacity(CLAUSE_WIDTH * 2);
        for (position, slots) in self.slots.iter().enumerate() {
            let low = slots.iter().map(|&v| (v & 0xFFFF_FFFF) as u32).collect();
            let high = slots.iter().map(|&v| (v >> 32) as u32).collect();
            files.push(DataInfoFile {
                position,
                half: 1,
                values: low,
            });
            files.push(DataInfoFile {
                position,
                half: 2,
                values: high,
            });
        }
        files
    }
}

/// Pack `formula` into the device layout. Clauses past [`MAX_CLAUSES`] are
/// dropped.
pub fn encode(formula: &Formula) -> EncodedProblem {
    let mut problem = EncodedProblem::default();

    if formula.clauses.len() > MAX_CLAUSES {
        tracing::warn!(
            clauses = formula.clauses.len(),
            max = MAX_CLAUSES,
            "Formula exceeds device clause slots, extra clauses dropped"
        );
    }

    let mut oversized = false;
    for (i, clause) in formula.clauses.iter().take(MAX_CLAUSES).enumerate() {
        for (j, &literal) in clause.iter().enumerate() {
            if literal == 0 {
                continue;
            }
            let magnitude = literal.unsigned_abs();
            if magnitude > ENABLE_BIT {
                oversized = true;
            }
            problem.slots[j][i] = pack_literal(literal);
        }
    }

    if oversized {
        tracing::warn!(
            max_variable = ENABLE_BIT,
            "Formula references variables beyond the device's range"
        );
    }

    problem
}

fn pack_literal(literal: i32) -> u64 {
    let variable_bit = 1u64
        .checked_shl(literal.unsigned_abs() - 1)
        .unwrap_or(0);
    let mut value = variable_bit | (1u64 << ENABLE_BIT);
    if literal > 0 {
        value |= 1u64 << POLARITY_BIT;
    }
    value
}
