use indexmap::IndexMap;
use rand::Rng;

use crate::dispatcher::Endpoint;

/// Picks an endpoint for a fresh, unbound request. Balancers only ever see
/// the endpoint set of a single route or event; instances not accepting new
/// traffic are skipped.
pub trait Balancer: Send + Sync {
    fn pick<'a>(&self, endpoints: &'a IndexMap<String, Endpoint>) -> Option<&'a Endpoint>;
}

fn candidates(endpoints: &IndexMap<String, Endpoint>) -> Vec<&Endpoint> {
    endpoints
        .values()
        .filter(|ep| ep.state.accepts_new())
        .collect()
}

/// Uniform random pick.
pub struct RandomBalancer;

impl Balancer for RandomBalancer {
    fn pick<'a>(&self, endpoints: &'a IndexMap<String, Endpoint>) -> Option<&'a Endpoint> {
        let candidates = candidates(endpoints);

        if candidates.is_empty() {
            return None;
        }

        let idx = rand::thread_rng().gen_range(0..candidates.len());

        Some(candidates[idx])
    }
}

/// Weight-proportional random pick. Weights below 1 count as 1.
pub struct WeightedRandomBalancer;

impl Balancer for WeightedRandomBalancer {
    fn pick<'a>(&self, endpoints: &'a IndexMap<String, Endpoint>) -> Option<&'a Endpoint> {
        let candidates = candidates(endpoints);

        if candidates.is_empty() {
            return None;
        }

        let total: u64 = candidates.iter().map(|ep| ep.weight.max(1) as u64).sum();
        let mut roll = rand::thread_rng().gen_range(0..total);

        for ep in candidates {
            let weight = ep.weight.max(1) as u64;

            if roll < weight {
                return Some(ep);
            }

            roll -= weight;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::State;
    use hashbrown::HashMap;

    fn endpoints(specs: &[(&str, State, u32)]) -> IndexMap<String, Endpoint> {
        specs
            .iter()
            .map(|(id, state, weight)| {
                (
                    id.to_string(),
                    Endpoint {
                        ins_id: id.to_string(),
                        address: format!("127.0.0.1:1{}", weight),
                        state: *state,
                        weight: *weight,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_random_empty_set() {
        assert!(RandomBalancer.pick(&IndexMap::new()).is_none());
        assert!(WeightedRandomBalancer.pick(&IndexMap::new()).is_none());
    }

    #[test]
    fn test_random_single_endpoint() {
        let eps = endpoints(&[("n1", State::Work, 1)]);

        for _ in 0..16 {
            assert_eq!(RandomBalancer.pick(&eps).unwrap().ins_id, "n1");
        }
    }

    #[test]
    fn test_weighted_single_endpoint() {
        let eps = endpoints(&[("n1", State::Work, 100)]);

        for _ in 0..16 {
            assert_eq!(WeightedRandomBalancer.pick(&eps).unwrap().ins_id, "n1");
        }
    }

    #[test]
    fn test_skips_non_accepting_states() {
        let eps = endpoints(&[
            ("n1", State::Hang, 1),
            ("n2", State::Work, 1),
            ("n3", State::Boot, 1),
        ]);

        for _ in 0..32 {
            assert_eq!(RandomBalancer.pick(&eps).unwrap().ins_id, "n2");
            assert_eq!(WeightedRandomBalancer.pick(&eps).unwrap().ins_id, "n2");
        }
    }

    #[test]
    fn test_all_hanging_yields_none() {
        let eps = endpoints(&[("n1", State::Hang, 1)]);

        assert!(RandomBalancer.pick(&eps).is_none());
    }

    #[test]
    fn test_weighted_distribution_favors_heavy_endpoint() {
        let eps = endpoints(&[("light", State::Work, 1), ("heavy", State::Work, 9)]);

        let mut hits: HashMap<String, u32> = HashMap::new();
        for _ in 0..2000 {
            let pick = WeightedRandomBalancer.pick(&eps).unwrap();
            *hits.entry(pick.ins_id.clone()).or_insert(0) += 1;
        }

        let heavy = hits.get("heavy").copied().unwrap_or(0);
        let light = hits.get("light").copied().unwrap_or(0);

        // Expectation is a 9:1 split; allow a generous margin.
        assert!(heavy > light * 4, "heavy {} light {}", heavy, light);
    }

    #[test]
    fn test_zero_weight_counts_as_one() {
        let eps = endpoints(&[("n1", State::Work, 0)]);

        assert_eq!(WeightedRandomBalancer.pick(&eps).unwrap().ins_id, "n1");
    }
}
