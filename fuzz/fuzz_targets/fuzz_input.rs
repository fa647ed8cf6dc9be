// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use filewarden::rules::RuleSet;
use filewarden::threat::{clamav, virustotal};
use filewarden::AppConfig;

/// Untrusted text the engine parses
#[derive(Arbitrary, Debug)]
enum Input {
    ClamdReply(String),
    VirusTotalReport(String),
    Config(String),
    Rules(String),
}

fuzz_target!(|input: Input| {
    match input {
        Input::ClamdReply(reply) => {
            let _ = clamav::parse_reply(&reply);
        }
        Input::VirusTotalReport(body) => {
            let _ = virustotal::parse_report(&body);
        }
        Input::Config(text) => {
            if let Ok(config) = serde_json::from_str::<AppConfig>(&text) {
                let _ = config.validate();
            }
        }
        Input::Rules(text) => {
            let _ = serde_json::from_str::<RuleSet>(&text);
        }
    }
});
