#[cfg(feature = "with-serde")]
use anyhow::Context;
use anyhow::{Result, bail};

use spfcheck_lib::{ResultCode, SpfResult};

use crate::args::Cli;

#[cfg_attr(feature = "with-serde", derive(serde::Serialize))]
pub struct OutputRow {
    pub ip: String,
    pub sender: String,
    pub helo: String,
    pub result: ResultCode,
    #[cfg_attr(feature = "with-serde", serde(skip_serializing_if = "String::is_empty"))]
    pub explanation: String,
    pub header: String,
}

impl OutputRow {
    pub fn new(cli: &Cli, result: &SpfResult) -> Self {
        Self {
            ip: cli.ip.clone(),
            sender: cli.sender.clone(),
            helo: cli.helo.clone(),
            result: result.result(),
            explanation: result.explanation().to_string(),
            header: result.header(),
        }
    }

    pub fn human_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "[{}] ip={} sender={} helo={}",
            self.result.as_str().to_ascii_uppercase(),
            self.ip,
            self.sender,
            self.helo
        )];
        if !self.explanation.is_empty() {
            lines.push(format!("        explanation: {}", self.explanation));
        }
        lines.push(format!("        {}", self.header));
        lines
    }
}

/// Code de sortie par résultat.
pub fn exit_code(result: ResultCode) -> i32 {
    match result {
        ResultCode::Pass => 0,
        ResultCode::Fail => 1,
        ResultCode::SoftFail => 2,
        ResultCode::Neutral => 3,
        ResultCode::TempError => 4,
        ResultCode::PermError => 5,
        ResultCode::None => 6,
    }
}

pub fn print(row: &OutputRow, format: &str) -> Result<()> {
    match format {
        "human" => {
            for line in row.human_lines() {
                println!("{line}");
            }
            Ok(())
        }
        "json" => {
            #[cfg(feature = "with-serde")]
            {
                let s = serde_json::to_string_pretty(row).context("serialize result")?;
                println!("{s}");
                Ok(())
            }
            #[cfg(not(feature = "with-serde"))]
            {
                bail!("format=json nécessite la feature 'with-serde'")
            }
        }
        other => bail!("unknown --format '{other}'"),
    }
}
