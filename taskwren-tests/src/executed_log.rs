// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use taskwren::payload::{InvokerKind, Payload};

/// File below the run directory the test job runner appends to.
pub const EXECUTED_LOG: &str = "executed.jsonl";

/// One call of the test job runner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutedBatch {
    pub pid: u32,

    pub invoker: InvokerKind,

    pub jobs: Vec<Payload>,
}

pub fn append(run_dir: &Path, batch: &ExecutedBatch) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(run_dir.join(EXECUTED_LOG))?;
    let line = serde_json::to_string(batch)?;
    writeln!(file, "{line}")
}

pub fn read(run_dir: &Path) -> io::Result<Vec<ExecutedBatch>> {
    let content = match fs::read_to_string(run_dir.join(EXECUTED_LOG)) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    content
        .lines()
        .map(|line| serde_json::from_str(line).map_err(io::Error::from))
        .collect()
}
