//! Join scheduler: pack channel joins into line-length-bounded `JOIN`
//! commands and pace them when there are many.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

use crate::client::Client;
use crate::irc::Message;

/// Budget for a whole `JOIN` line, leaving room for the `\r\n` and slack
/// under the 512-byte limit.
pub const MAX_JOIN_LEN: usize = 500;
pub const MAX_TARGETS: usize = 4;
/// More batches than this are paced.
pub const PACE_THRESHOLD: usize = 3;

const PACE_STEP_MS: std::ops::RangeInclusive<u64> = 100..=1500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinBatch {
    /// Keyed channels first, so keys line up positionally.
    pub channels: Vec<String>,
    pub keys: Vec<String>,
}

impl JoinBatch {
    pub fn to_message(&self) -> Message {
        let mut params = vec![self.channels.join(",")];
        if !self.keys.is_empty() {
            params.push(self.keys.join(","));
        }
        Message::new("JOIN", params)
    }

    pub fn wire_len(&self) -> usize {
        self.to_message().to_wire().len()
    }

    fn with(&self, channel: &str, key: Option<&str>) -> JoinBatch {
        let mut next = self.clone();
        match key {
            Some(key) => {
                let keyed = next.keys.len();
                next.channels.insert(keyed, channel.to_string());
                next.keys.push(key.to_string());
            }
            None => next.channels.push(channel.to_string()),
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedJoin {
    pub channel: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinPlan {
    pub batches: Vec<JoinBatch>,
    pub rejected: Vec<RejectedJoin>,
}

#[derive(Debug, Clone, Copy)]
pub struct JoinPlanner {
    pub max_len: usize,
    pub max_targets: usize,
    pub pace_threshold: usize,
}

impl Default for JoinPlanner {
    fn default() -> Self {
        Self {
            max_len: MAX_JOIN_LEN,
            max_targets: MAX_TARGETS,
            pace_threshold: PACE_THRESHOLD,
        }
    }
}

impl JoinPlanner {
    /// Pack `channels` (looking up keys in `keys`) into batches.
    pub fn plan<I, S>(&self, channels: I, keys: &HashMap<String, String>) -> JoinPlan
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut plan = JoinPlan::default();
        let mut current = JoinBatch::default();

        for channel in channels {
            let channel = channel.as_ref();
            let key = lookup_key(keys, channel);
            if let Err(reason) = check(channel, key) {
                tracing::error!(%channel, reason, "unable to join channel");
                plan.rejected.push(RejectedJoin {
                    channel: channel.to_string(),
                    reason,
                });
                continue;
            }
            if JoinBatch::default().with(channel, key).wire_len() > self.max_len {
                tracing::error!(%channel, "unable to join channel:key; too long");
                plan.rejected.push(RejectedJoin {
                    channel: channel.to_string(),
                    reason: "channel and key exceed the line budget",
                });
                continue;
            }

            let candidate = current.with(channel, key);
            if current.channels.len() >= self.max_targets || candidate.wire_len() > self.max_len {
                plan.batches.push(std::mem::take(&mut current));
                current = current.with(channel, key);
            } else {
                current = candidate;
            }
        }
        if !current.channels.is_empty() {
            plan.batches.push(current);
        }
        plan
    }

    pub fn needs_pacing(&self, plan: &JoinPlan) -> bool {
        plan.batches.len() > self.pace_threshold
    }
}

fn lookup_key<'a>(keys: &'a HashMap<String, String>, channel: &str) -> Option<&'a str> {
    keys.get(channel)
        .or_else(|| {
            keys.iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(channel))
                .map(|(_, key)| key)
        })
        .map(String::as_str)
        .filter(|key| !key.is_empty())
}

fn check(channel: &str, key: Option<&str>) -> Result<(), &'static str> {
    let bad = |c: char| c == ' ' || c == ',' || c.is_control();
    if channel.is_empty() || channel.contains(bad) {
        return Err("invalid channel name");
    }
    if key.is_some_and(|k| k.contains(bad) || k.starts_with(':')) {
        return Err("invalid channel key");
    }
    Ok(())
}

/// Strictly increasing delays, one random step apart.
pub fn pace_delays<R: Rng>(count: usize, rng: &mut R) -> Vec<Duration> {
    let mut total = 0;
    (0..count)
        .map(|_| {
            total += rng.gen_range(PACE_STEP_MS);
            Duration::from_millis(total)
        })
        .collect()
}

/// What [`Client::join_channels`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    pub sent: usize,
    /// `(timer name, delay)` for paced batches.
    pub scheduled: Vec<(String, Duration)>,
    pub rejected: Vec<RejectedJoin>,
}

impl Client {
    /// Join `channels`, batching and pacing as needed.
    pub fn join_channels<I, S>(&mut self, channels: I, keys: &HashMap<String, String>) -> JoinReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let planner = JoinPlanner::default();
        let plan = planner.plan(channels, keys);
        let mut report = JoinReport {
            rejected: plan.rejected.clone(),
            ..JoinReport::default()
        };

        if !planner.needs_pacing(&plan) {
            for batch in &plan.batches {
                if self.send(batch.to_message()) {
                    report.sent += 1;
                }
            }
            return report;
        }

        let delays = pace_delays(plan.batches.len(), &mut rand::thread_rng());
        for (batch, delay) in plan.batches.into_iter().zip(delays) {
            let name = format!("join_channel_{}", self.session_mut().next_join_seq());
            let msg = batch.to_message();
            self.timers_mut()
                .schedule_once(name.clone(), delay, move |c: &mut Client| {
                    c.send(msg.clone());
                });
            report.scheduled.push((name, delay));
        }
        tracing::debug!(batches = report.scheduled.len(), "pacing channel joins");
        report
    }

    pub fn join(&mut self, channel: &str, key: Option<&str>) -> bool {
        match key {
            Some(key) => self.send_command("JOIN", [channel, key]),
            None => self.send_command("JOIN", [channel]),
        }
    }
}
