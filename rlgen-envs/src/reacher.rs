use candle_core::{Result, bail};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rlgen_core::env::{Env, EnvironmentDescription, MetaEnv, SnapShot, Space};

const LINK_LENGTHS: [f32; 2] = [0.1, 0.11];
const LINK_MASSES: [f32; 2] = [0.035, 0.035];
const ARMATURE: f32 = 1.;
const DAMPING: f32 = 1.;
const GEAR: f32 = 200.;
const ELBOW_LIMIT: f32 = 3.;
const TIMESTEP: f32 = 0.01;
const FRAME_SKIP: usize = 2;
const GOAL_RADIUS: f32 = 0.2;

pub const OBSERVATION_SIZE: usize = 11;
pub const ACTION_SIZE: usize = 2;

/// Two link planar arm that has to bring its fingertip onto a randomly placed goal.
///
/// The links are modeled as point masses at their distal ends, joints are damped and carry rotor
/// inertia (armature). Integration is semi implicit Euler.
#[derive(Debug, Clone)]
pub struct Reacher {
    qpos: [f32; 2],
    qvel: [f32; 2],
    goal: [f32; 2],
    steps: usize,
    max_episode_steps: usize,
    rng: StdRng,
}

impl Default for Reacher {
    fn default() -> Self {
        Self::new(50)
    }
}

impl Reacher {
    pub fn new(max_episode_steps: usize) -> Self {
        Self {
            qpos: [0.; 2],
            qvel: [0.; 2],
            goal: [0.; 2],
            steps: 0,
            max_episode_steps,
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn goal(&self) -> [f32; 2] {
        self.goal
    }

    pub fn set_state(&mut self, qpos: [f32; 2], qvel: [f32; 2]) {
        self.qpos = qpos;
        self.qvel = qvel;
    }

    pub fn fingertip(&self) -> [f32; 2] {
        let [q1, q2] = self.qpos;
        let [l1, l2] = LINK_LENGTHS;
        [
            l1 * q1.cos() + l2 * (q1 + q2).cos(),
            l1 * q1.sin() + l2 * (q1 + q2).sin(),
        ]
    }

    fn observation(&self) -> Vec<f32> {
        let [q1, q2] = self.qpos;
        let tip = self.fingertip();
        vec![
            q1.cos(),
            q2.cos(),
            q1.sin(),
            q2.sin(),
            self.goal[0],
            self.goal[1],
            self.qvel[0],
            self.qvel[1],
            tip[0] - self.goal[0],
            tip[1] - self.goal[1],
            0.,
        ]
    }

    fn accelerations(&self, torque: [f32; 2]) -> [f32; 2] {
        let [l1, l2] = LINK_LENGTHS;
        let [m1, m2] = LINK_MASSES;
        let [qd1, qd2] = self.qvel;
        let (s2, c2) = self.qpos[1].sin_cos();
        let m11 = ARMATURE + m1 * l1 * l1 + m2 * (l1 * l1 + l2 * l2 + 2. * l1 * l2 * c2);
        let m12 = m2 * (l2 * l2 + l1 * l2 * c2);
        let m22 = ARMATURE + m2 * l2 * l2;
        let h = m2 * l1 * l2 * s2;
        let bias = [-h * (2. * qd1 * qd2 + qd2 * qd2), h * qd1 * qd1];
        let f = [
            torque[0] - DAMPING * qd1 - bias[0],
            torque[1] - DAMPING * qd2 - bias[1],
        ];
        let det = m11 * m22 - m12 * m12;
        [
            (m22 * f[0] - m12 * f[1]) / det,
            (m11 * f[1] - m12 * f[0]) / det,
        ]
    }

    fn integrate(&mut self, action: [f32; 2]) {
        let torque = [GEAR * action[0], GEAR * action[1]];
        let qdd = self.accelerations(torque);
        for i in 0..2 {
            self.qvel[i] += TIMESTEP * qdd[i];
            self.qpos[i] += TIMESTEP * self.qvel[i];
        }
        if self.qpos[1].abs() > ELBOW_LIMIT {
            self.qpos[1] = self.qpos[1].clamp(-ELBOW_LIMIT, ELBOW_LIMIT);
            self.qvel[1] = 0.;
        }
    }
}

impl Env for Reacher {
    fn reset(&mut self, seed: u64) -> Result<Vec<f32>> {
        self.rng = StdRng::seed_from_u64(seed);
        self.qpos = [
            self.rng.random_range(-0.1..0.1),
            self.rng.random_range(-0.1..0.1),
        ];
        self.qvel = [
            self.rng.random_range(-0.005..0.005),
            self.rng.random_range(-0.005..0.005),
        ];
        self.goal = loop {
            let goal = [
                self.rng.random_range(-GOAL_RADIUS..GOAL_RADIUS),
                self.rng.random_range(-GOAL_RADIUS..GOAL_RADIUS),
            ];
            if goal[0].hypot(goal[1]) < GOAL_RADIUS {
                break goal;
            }
        };
        self.steps = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: &[f32]) -> Result<SnapShot> {
        if action.len() != ACTION_SIZE {
            bail!("reacher expects {ACTION_SIZE} torques, got {}", action.len());
        }
        let action = [action[0].clamp(-1., 1.), action[1].clamp(-1., 1.)];
        let tip = self.fingertip();
        let distance = (tip[0] - self.goal[0]).hypot(tip[1] - self.goal[1]);
        let control_cost = action[0] * action[0] + action[1] * action[1];
        for _ in 0..FRAME_SKIP {
            self.integrate(action);
        }
        self.steps += 1;
        Ok(SnapShot {
            state: self.observation(),
            reward: -distance - control_cost,
            terminated: false,
            truncated: self.steps >= self.max_episode_steps,
        })
    }

    fn env_description(&self) -> EnvironmentDescription {
        EnvironmentDescription::new(
            Space::continuous_from_dims(vec![OBSERVATION_SIZE]),
            Space::unit_box(ACTION_SIZE),
        )
    }
}

impl MetaEnv for Reacher {
    fn meta_variables(&self) -> Vec<f32> {
        self.goal.to_vec()
    }
}
