// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::sync::Arc;

use misty::{
    cli::Cli,
    config::Config,
    manager::{Manager, RunOutcome},
    node::NodeReport,
    utils::init_logging,
};

/// Show concise usage message
fn show_usage() {
    println!("usage: misty [-v] [-f] [-t] [-C cluster] [--config file]");
    println!("             [selection: -n nodes | --master m | -a | -i | -o | --down | --chassis c | --all-nodes]");
    println!("             [actions: -s | --poweron | --poweroff | --hardreboot | --setoffline | ...]");
    println!();
    println!("For more information, try 'misty --help'");
}

fn print_reports(reports: &[NodeReport]) {
    let mut failed = Vec::new();
    for report in reports {
        println!("{}:", report.target.bold());
        for record in &report.records {
            println!("    output: {}", record.outcome.output);
            if let Some(error) = &record.outcome.error {
                println!("    error: {}", error.red());
            }
        }
        if let Some(failure) = &report.failure {
            println!("    error: {}", failure.red());
        }
        if report.has_errors() {
            failed.push(report.target.clone());
        }
    }

    if !failed.is_empty() {
        println!("{} {}", "ERRORS occured in:".red(), failed.join(", "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::args().len() == 1 {
        show_usage();
        std::process::exit(0);
    }

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_with_priority(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    let mut manager = Manager::new(Arc::new(config), cli.options()).await?;

    if let Some(report) = manager.status_report() {
        println!("{report}");
    }

    match manager.doit().await? {
        RunOutcome::Refused(reason) => {
            eprintln!("{}", reason.red());
            std::process::exit(1);
        }
        RunOutcome::DryRun(commands) => {
            for command in commands {
                println!("{command}");
            }
        }
        RunOutcome::Completed(reports) => print_reports(&reports),
    }

    Ok(())
}
