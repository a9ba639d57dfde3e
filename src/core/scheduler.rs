//! 步骤调度：决定一轮尝试内步骤的执行顺序
//!
//! 步骤始终串行执行；调度器只给出顺序。默认按计划顺序，依赖声明仅作参考。

use std::collections::HashSet;

use crate::core::state::Plan;

/// 给出计划中步骤的执行顺序（返回 step 下标）
pub trait StepScheduler: Send + Sync {
    fn name(&self) -> &'static str;

    fn order(&self, plan: &Plan) -> Vec<usize>;
}

/// 按计划给出的顺序
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialScheduler;

impl StepScheduler for SequentialScheduler {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn order(&self, plan: &Plan) -> Vec<usize> {
        (0..plan.steps.len()).collect()
    }
}

/// 按 depends_on 的稳定拓扑序：依赖满足的步骤中总是先取计划里靠前的；
/// 存在环或未知依赖时，剩余步骤按计划顺序追加
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyOrderScheduler;

impl StepScheduler for DependencyOrderScheduler {
    fn name(&self) -> &'static str {
        "dependency"
    }

    fn order(&self, plan: &Plan) -> Vec<usize> {
        let known: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        let graph = plan.dependency_graph();
        let mut done: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(plan.steps.len());

        while order.len() < plan.steps.len() {
            let next = plan.steps.iter().enumerate().find(|(i, step)| {
                !order.contains(i)
                    && graph
                        .get(&step.id)
                        .map(|deps| {
                            deps.iter()
                                .filter(|d| known.contains(d.as_str()))
                                .all(|d| done.contains(d.as_str()))
                        })
                        .unwrap_or(true)
            });
            match next {
                Some((i, step)) => {
                    done.insert(step.id.as_str());
                    order.push(i);
                }
                None => {
                    tracing::warn!("Dependency cycle detected, falling back to plan order");
                    let rest: Vec<usize> = (0..plan.steps.len())
                        .filter(|i| !order.contains(i))
                        .collect();
                    order.extend(rest);
                }
            }
        }
        order
    }
}

/// 按配置名构造调度器；未知名称回退到 sequential
pub fn scheduler_from_name(name: &str) -> Box<dyn StepScheduler> {
    match name.trim().to_lowercase().as_str() {
        "sequential" => Box::new(SequentialScheduler),
        "dependency" => Box::new(DependencyOrderScheduler),
        other => {
            tracing::warn!(scheduler = other, "Unknown scheduler, using sequential");
            Box::new(SequentialScheduler)
        }
    }
}
