//! Example: a two-level feudal hierarchy learning to reach a goal cell on
//! the 4x4 grid.

use feudal_rl_agent::Hierarchy;
use feudal_rl_core::{LearningConfig, StateId};
use feudal_rl_env::{EnvRequest, make_env};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let goal_cell = (3, 0); // c12, the north-east corner
    let (env, partition) = make_env(
        "grid-4x4",
        &EnvRequest {
            seed: Some(7),
            goal: Some(goal_cell),
        },
    )?;
    let goal = env.state_of(goal_cell.0, goal_cell.1);

    let config = LearningConfig {
        warmup: 2_000,
        seed: Some(7),
        ..LearningConfig::default()
    };
    let mut hierarchy = Hierarchy::build(partition, env, &config, Some(goal))?;

    // Warm-up exploration first, then goal-directed episodes.
    hierarchy.run_until(2_000).await?;
    hierarchy.run_episodes(100, 20_000).await?;

    println!(
        "completed {} episodes in {} simulated steps",
        hierarchy.completed_episodes(),
        hierarchy.now()
    );
    println!(
        "mean episode length: {:.1}",
        hierarchy.top()?.mean_episode_length()
    );

    for id in ["A0", "A1", "A2", "A3"] {
        let node = hierarchy.node(&StateId::from(id))?;
        println!("agent {id}:");
        for task in node.tasks().iter() {
            println!("  discovered {task}");
        }
    }

    let top = hierarchy.top()?;
    println!("supervisor policy towards the goal:");
    for (state, action) in top.goal_policy()? {
        match action {
            Some(action) => println!("  {state} -> {action}"),
            None => println!("  {state} -> (unexplored)"),
        }
    }

    Ok(())
}
