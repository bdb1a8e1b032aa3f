//! The state matching pusher: a seven joint arm pushing a cylinder towards a goal marker on a
//! table. Only the physics description ships with the workspace, simulating it requires MuJoCo.

use candle_core::{Result, bail};
use rlgen_core::env::Space;

pub const STATE_MATCHING_PUSHER_XML: &str = include_str!("../assets/state_matching_pusher.xml");

#[derive(Debug, Clone, PartialEq)]
pub struct Actuator {
    pub joint: String,
    pub ctrl_range: (f32, f32),
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let key = format!("{name}=\"");
    let start = tag.find(&key)? + key.len();
    let len = tag[start..].find('"')?;
    Some(&tag[start..start + len])
}

/// Motor actuators declared in `xml`, in declaration order.
pub fn parse_actuators(xml: &str) -> Result<Vec<Actuator>> {
    let mut actuators = vec![];
    for tag in xml.split('<').filter(|tag| tag.starts_with("motor")) {
        let Some(joint) = attribute(tag, "joint") else {
            bail!("motor without a joint: <{}", tag.trim());
        };
        let Some(range) = attribute(tag, "ctrlrange") else {
            bail!("motor on {joint} has no ctrlrange");
        };
        let bounds = range
            .split_whitespace()
            .map(str::parse::<f32>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|err| candle_core::Error::Msg(format!("bad ctrlrange on {joint}: {err}")))?;
        let [low, high] = bounds[..] else {
            bail!("ctrlrange on {joint} must have two values, got {range}");
        };
        actuators.push(Actuator {
            joint: joint.to_string(),
            ctrl_range: (low, high),
        });
    }
    Ok(actuators)
}

pub fn actuators() -> Result<Vec<Actuator>> {
    parse_actuators(STATE_MATCHING_PUSHER_XML)
}

/// Action space spanned by the pusher's motors.
pub fn action_space() -> Result<Space> {
    let actuators = actuators()?;
    let low = actuators.iter().map(|a| a.ctrl_range.0).collect();
    let high = actuators.iter().map(|a| a.ctrl_range.1).collect();
    Space::bounded(low, high)
}
