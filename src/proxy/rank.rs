//! Latency ranking of probed proxies

use crate::models::{ProbeOutcome, RankedProxy};

/// Keep live outcomes, fastest first, at most `cap` of them
///
/// Equal latencies are ordered by the descriptor's string form so repeated
/// runs over the same measurements produce the same chain.
pub fn select<I>(outcomes: I, cap: usize) -> Vec<RankedProxy>
where
    I: IntoIterator<Item = ProbeOutcome>,
{
    let mut ranked: Vec<(RankedProxy, String)> = outcomes
        .into_iter()
        .filter_map(|outcome| {
            let latency = outcome.latency()?;
            let descriptor = outcome.descriptor().clone();
            let key = descriptor.to_string();
            Some((
                RankedProxy {
                    descriptor,
                    latency,
                },
                key,
            ))
        })
        .collect();

    ranked.sort_by(|(a, a_key), (b, b_key)| {
        a.latency.cmp(&b.latency).then_with(|| a_key.cmp(b_key))
    });
    ranked.truncate(cap);

    ranked.into_iter().map(|(proxy, _)| proxy).collect()
}
