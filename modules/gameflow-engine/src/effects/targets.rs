use gameflow_common::{GameState, TargetSelector};
use rand::seq::IndexedRandom;

/// Resolve a selector to player ids. `current` is the designated target.
/// Unknown ids and a missing designated target resolve to nothing.
pub fn resolve_targets(
    selector: &TargetSelector,
    current: Option<&str>,
    game: &GameState,
) -> Vec<String> {
    match selector {
        TargetSelector::Current => current
            .filter(|id| game.player(id).is_some())
            .map(|id| vec![id.to_string()])
            .unwrap_or_default(),
        TargetSelector::All => game.player_ids(),
        TargetSelector::Others => game
            .players
            .iter()
            .filter(|p| Some(p.id.as_str()) != current)
            .map(|p| p.id.clone())
            .collect(),
        TargetSelector::Random => game
            .players
            .choose(&mut rand::rng())
            .map(|p| vec![p.id.clone()])
            .unwrap_or_default(),
        TargetSelector::Player(id) => game
            .player(id)
            .map(|p| vec![p.id.clone()])
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gameflow_common::Player;

    fn game() -> GameState {
        GameState::new(vec![
            Player::new("p1", "Ada", 0),
            Player::new("p2", "Grace", 0),
            Player::new("p3", "Linus", 0),
        ])
    }

    #[test]
    fn keyword_selectors() {
        let g = game();
        assert_eq!(resolve_targets(&TargetSelector::Current, Some("p2"), &g), vec!["p2"]);
        assert_eq!(resolve_targets(&TargetSelector::All, Some("p2"), &g).len(), 3);
        assert_eq!(
            resolve_targets(&TargetSelector::Others, Some("p2"), &g),
            vec!["p1", "p3"]
        );
        assert_eq!(
            resolve_targets(&TargetSelector::Player("p3".into()), None, &g),
            vec!["p3"]
        );
    }

    #[test]
    fn random_picks_exactly_one_existing_player() {
        let g = game();
        for _ in 0..20 {
            let picked = resolve_targets(&TargetSelector::Random, None, &g);
            assert_eq!(picked.len(), 1);
            assert!(g.player(&picked[0]).is_some());
        }
    }

    #[test]
    fn others_of_sole_player_is_empty() {
        let g = GameState::new(vec![Player::new("solo", "Solo", 0)]);
        assert!(resolve_targets(&TargetSelector::Others, Some("solo"), &g).is_empty());
    }

    #[test]
    fn unknown_targets_resolve_to_nothing() {
        let g = game();
        assert!(resolve_targets(&TargetSelector::Current, None, &g).is_empty());
        assert!(resolve_targets(&TargetSelector::Current, Some("ghost"), &g).is_empty());
        assert!(resolve_targets(&TargetSelector::Player("ghost".into()), None, &g).is_empty());
        let empty = GameState::default();
        assert!(resolve_targets(&TargetSelector::Random, None, &empty).is_empty());
    }
}
