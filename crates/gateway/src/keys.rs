//! Credential selection.

use std::sync::Arc;

use rand::Rng;
use schema::{GatewayError, Key, ProviderId};

use crate::context::RequestContext;

/// Picks one credential per request. Custom selectors may implement sticky
/// routing by hashing context values; the default is weighted-random over the
/// keys allowed for the model.
pub type KeySelector = Arc<
    dyn Fn(&RequestContext, &[Key], ProviderId, &str) -> Result<Key, Box<GatewayError>>
        + Send
        + Sync,
>;

/// Select a key using `selector` when given, the weighted-random default
/// otherwise.
pub fn select_key(
    ctx: &RequestContext,
    selector: Option<&KeySelector>,
    keys: &[Key],
    provider: ProviderId,
    model: &str,
    substring_match: bool,
) -> Result<Key, Box<GatewayError>> {
    match selector {
        Some(selector) => selector(ctx, keys, provider, model),
        None => weighted_random_key(keys, provider, model, substring_match),
    }
}

/// Weighted-random choice over the keys whose allow-list admits `model`.
pub fn weighted_random_key(
    keys: &[Key],
    provider: ProviderId,
    model: &str,
    substring_match: bool,
) -> Result<Key, Box<GatewayError>> {
    let eligible: Vec<&Key> = keys
        .iter()
        .filter(|key| key.allows_model(model, substring_match))
        .collect();

    if eligible.is_empty() {
        return Err(Box::new(GatewayError::configuration(format!(
            "no key configured for provider {provider} and model {model}"
        ))));
    }

    let total: f32 = eligible.iter().map(|key| key.weight.max(0.0)).sum();
    if total <= 0.0 {
        // All weights zero: fall back to uniform.
        let index = rand::rng().random_range(0..eligible.len());
        return Ok(eligible[index].clone());
    }

    let mut point = rand::rng().random_range(0.0..total);
    for key in &eligible {
        point -= key.weight.max(0.0);
        if point <= 0.0 {
            return Ok((*key).clone());
        }
    }

    Ok(eligible[eligible.len() - 1].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, weight: f32, models: &[&str]) -> Key {
        let mut key = Key::new(id, "secret");
        key.weight = weight;
        key.models = models.iter().map(|m| m.to_string()).collect();
        key
    }

    #[test]
    fn ineligible_keys_are_filtered_out() {
        let keys = vec![key("a", 1.0, &["gpt-4o"]), key("b", 1.0, &["claude"])];

        for _ in 0..20 {
            let selected = weighted_random_key(&keys, ProviderId::OpenAi, "gpt-4o", false).unwrap();
            assert_eq!(selected.id, "a");
        }
    }

    #[test]
    fn no_eligible_key_is_a_configuration_error() {
        let keys = vec![key("a", 1.0, &["claude"])];
        let error = weighted_random_key(&keys, ProviderId::OpenAi, "gpt-4o", false).unwrap_err();
        assert_eq!(error.kind, Some(schema::ErrorKind::Configuration));
    }

    #[test]
    fn zero_weight_keys_still_select_uniformly() {
        let keys = vec![key("a", 0.0, &[]), key("b", 0.0, &[])];
        let selected = weighted_random_key(&keys, ProviderId::OpenAi, "gpt-4o", true).unwrap();
        assert!(selected.id == "a" || selected.id == "b");
    }

    #[test]
    fn weights_bias_the_draw() {
        let keys = vec![key("heavy", 1000.0, &[]), key("light", 0.001, &[])];

        let mut heavy = 0;
        for _ in 0..50 {
            if weighted_random_key(&keys, ProviderId::OpenAi, "m", true).unwrap().id == "heavy" {
                heavy += 1;
            }
        }
        assert!(heavy >= 45, "expected the heavy key to dominate, got {heavy}/50");
    }

    #[test]
    fn custom_selector_takes_precedence() {
        let keys = vec![key("a", 1.0, &[]), key("b", 1.0, &[])];
        let selector: KeySelector = Arc::new(|_, keys, _, _| Ok(keys[1].clone()));

        let selected = select_key(
            &RequestContext::default(),
            Some(&selector),
            &keys,
            ProviderId::OpenAi,
            "m",
            true,
        )
        .unwrap();
        assert_eq!(selected.id, "b");
    }
}
