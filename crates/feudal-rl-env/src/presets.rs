//! Canonical grid hierarchies
//!
//! Two ready-made setups: a 4x4 grid with four 2x2 leaf partitions under
//! one supervisor, and an 8x8 grid with three levels and a wall splitting
//! the upper half. Cell ids follow the column-major convention
//! `c{x * height + y}`.

use indexmap::IndexMap;

use feudal_rl_core::{AgentId, PartitionSpec, StateId};

use crate::grid::GridConfig;

fn states(ids: &[&str]) -> Vec<StateId> {
    ids.iter().map(|id| StateId::from(*id)).collect()
}

fn level(entries: &[(&str, &[&str])]) -> IndexMap<AgentId, Vec<StateId>> {
    entries
        .iter()
        .map(|(agent, members)| (AgentId::from(*agent), states(members)))
        .collect()
}

fn exits(entries: &[(&str, &[&str])]) -> IndexMap<AgentId, Vec<AgentId>> {
    entries
        .iter()
        .map(|(agent, reachable)| (AgentId::from(*agent), states(reachable)))
        .collect()
}

/// 4x4 grid: four 2x2 leaf partitions under a single supervisor.
///
/// ```text
///   c0  c4 | c8  c12          A0 | A2
///   c1  c5 | c9  c13          ---+---
///   ---+---+---+---           A1 | A3
///   c2  c6 | c10 c14
///   c3  c7 | c11 c15
/// ```
#[must_use]
pub fn grid_4x4() -> (GridConfig, PartitionSpec) {
    let config = GridConfig {
        width: 4,
        height: 4,
        forbidden: vec![],
        goal: None,
        seed: None,
    };
    let spec = PartitionSpec {
        levels: vec![
            level(&[
                ("A0", &["c0", "c1", "c4", "c5"]),
                ("A1", &["c2", "c3", "c6", "c7"]),
                ("A2", &["c8", "c9", "c12", "c13"]),
                ("A3", &["c10", "c11", "c14", "c15"]),
            ]),
            level(&[("SUP", &["A0", "A1", "A2", "A3"])]),
        ],
        exits: exits(&[
            ("A0", &["A1", "A2"]),
            ("A1", &["A0", "A3"]),
            ("A2", &["A0", "A3"]),
            ("A3", &["A1", "A2"]),
            ("SUP", &[]),
        ]),
    };
    (config, spec)
}

/// 8x8 grid: sixteen 2x2 leaf partitions, four mid-level regions and one
/// supervisor, with a wall between the B0 and B1 regions.
#[must_use]
pub fn grid_8x8() -> (GridConfig, PartitionSpec) {
    let config = GridConfig {
        width: 8,
        height: 8,
        forbidden: vec![(0, 4), (1, 4), (2, 4), (3, 4)],
        goal: None,
        seed: None,
    };
    let spec = PartitionSpec {
        levels: vec![
            level(&[
                ("A0", &["c0", "c1", "c8", "c9"]),
                ("A1", &["c2", "c3", "c10", "c11"]),
                ("A2", &["c4", "c5", "c12", "c13"]),
                ("A3", &["c6", "c7", "c14", "c15"]),
                ("A4", &["c16", "c17", "c24", "c25"]),
                ("A5", &["c18", "c19", "c26", "c27"]),
                ("A6", &["c20", "c21", "c28", "c29"]),
                ("A7", &["c22", "c23", "c30", "c31"]),
                ("A8", &["c32", "c33", "c40", "c41"]),
                ("A9", &["c34", "c35", "c42", "c43"]),
                ("A10", &["c36", "c37", "c44", "c45"]),
                ("A11", &["c38", "c39", "c46", "c47"]),
                ("A12", &["c48", "c49", "c56", "c57"]),
                ("A13", &["c50", "c51", "c58", "c59"]),
                ("A14", &["c52", "c53", "c60", "c61"]),
                ("A15", &["c54", "c55", "c62", "c63"]),
            ]),
            level(&[
                ("B0", &["A0", "A1", "A4", "A5"]),
                ("B1", &["A2", "A3", "A6", "A7"]),
                ("B2", &["A8", "A9", "A12", "A13"]),
                ("B3", &["A10", "A11", "A14", "A15"]),
            ]),
            level(&[("SUP", &["B0", "B1", "B2", "B3"])]),
        ],
        exits: exits(&[
            ("A0", &["A1", "A4"]),
            ("A1", &["A0", "A5"]),
            ("A2", &["A3", "A6"]),
            ("A3", &["A2", "A7"]),
            ("A4", &["A0", "A5", "B2"]),
            ("A5", &["A1", "A4", "B2"]),
            ("A6", &["A2", "A7", "B3"]),
            ("A7", &["A3", "A6", "B3"]),
            ("A8", &["A9", "A12", "B0"]),
            ("A9", &["A8", "A13", "B0", "B3"]),
            ("A10", &["A11", "A14", "B1", "B2"]),
            ("A11", &["A10", "A15", "B1"]),
            ("A12", &["A8", "A13"]),
            ("A13", &["A9", "A12", "B3"]),
            ("A14", &["A10", "A15", "B2"]),
            ("A15", &["A11", "A14"]),
            ("B0", &["B2"]),
            ("B1", &["B3"]),
            ("B2", &["B0", "B3"]),
            ("B3", &["B1", "B2"]),
            ("SUP", &[]),
        ]),
    };
    (config, spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridWorldEnv;
    use feudal_rl_core::Environment;

    #[test]
    fn presets_validate_against_their_grids() {
        for (config, spec) in [grid_4x4(), grid_8x8()] {
            let env = GridWorldEnv::new(config).unwrap();
            spec.validate(&env.states()).unwrap();
        }
    }

    #[test]
    fn the_8x8_goal_chain_matches_the_partition() {
        let (_, spec) = grid_8x8();
        let chain = spec.goal_chain(&StateId::from("c12")).unwrap();
        assert_eq!(chain, states(&["c12", "A2", "B1", "SUP"]));
    }
}
