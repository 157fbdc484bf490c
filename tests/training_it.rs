use qtrader::prelude::*;

mod common;
use common::{scratch_dir, setup_config, setup_series};

#[test]
fn train_then_simulate_with_extracted_strategy() -> anyhow::Result<()> {
    common::init_tracing();
    let mut cfg = setup_config();
    cfg.agent.num_episodes = 20;
    cfg.agent.batch_size = 16;

    let mut env = Environment::new(&cfg, setup_series(60))?;
    let mut agent = Agent::new(&cfg)?;
    let (strategy, report) = agent.q_learn(&mut env, true)?;

    assert_eq!(report.len(), 20);
    assert_eq!(strategy.len(), 64);
    assert!(agent.epsilon() < cfg.agent.epsilon);
    assert!(report.episodes().iter().all(|e| e.avg_reward.is_finite()));

    let (summary, log) = agent.simulate(&mut env, &strategy)?;
    assert_eq!(summary.steps, 60);
    assert_eq!(log.len(), 60);
    assert!(log.records().iter().all(|r| r.budget >= 0.0 && r.shares >= 0.0));
    Ok(())
}

#[test]
fn persisted_policy_yields_the_same_strategy() -> anyhow::Result<()> {
    let dir = scratch_dir("policy");
    let mut cfg = setup_config();
    cfg.agent.num_episodes = 5;
    cfg.agent.experience_replay = true;
    cfg.agent.exp_batch_size = 8;

    let mut env = Environment::new(&cfg, setup_series(40))?;
    let mut agent = Agent::new(&cfg)?;
    let (strategy, _) = agent.q_learn(&mut env, true)?;

    for format in [SerdeFormat::Postcard, SerdeFormat::Json] {
        let path = dir.join(format!("policy.{format}"));
        let mut cfg = cfg.clone();
        cfg.policy.format = format;
        cfg.policy.policy_file = Some(path.clone());
        let saved = Agent::with_policy(&cfg, agent.policy().clone())?.save_policy()?;
        assert_eq!(saved, path);

        let loaded = Agent::<LinearPolicy>::q_load(&cfg)?;
        assert_eq!(loaded.strategy()?, strategy);
    }

    let path = dir.join("explicit.postcard");
    agent.save_policy_to(&path)?;
    let loaded = Agent::<LinearPolicy>::q_load_from(&cfg, &path)?;
    assert_eq!(loaded.strategy()?, strategy);

    let path = dir.join("strategy.json");
    strategy.save_json(&path)?;
    assert_eq!(Strategy::load_json(&path)?, strategy);
    Ok(())
}

#[test]
fn same_seed_same_training() -> anyhow::Result<()> {
    let mut cfg = setup_config();
    cfg.agent.num_episodes = 4;

    let run = || -> anyhow::Result<TrainingReport> {
        let mut env = Environment::new(&cfg, setup_series(30))?;
        let mut agent = Agent::new(&cfg)?;
        Ok(agent.reinforce_learn(&mut env)?)
    };
    assert_eq!(run()?, run()?);
    Ok(())
}

#[test]
fn config_file_round_trip() -> anyhow::Result<()> {
    let dir = scratch_dir("config");
    let path = dir.join("config.json");
    let cfg = setup_config();
    std::fs::write(&path, serde_json::to_string_pretty(&cfg)?)?;
    assert_eq!(TraderConfig::from_json_file(&path)?, cfg);
    Ok(())
}
