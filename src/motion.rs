// Motion orders from every command source, summed into one chassis velocity
//
// Orders are in mm/s and deg/s. There is one joystick slot, one API slot and a small
// pool of program slots. Enabled orders are added together, a source that wants
// exclusive control has to disable the others.

use serde::{Deserialize, Serialize};

use crate::config::PROGRAM_SLOTS;
use crate::drive::ChassisVelocity;

/// Who issued an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    Joystick,
    Api,
    /// A running program, keyed by its context id
    Program(u32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionOrder {
    pub enabled: bool,
    pub source: Option<OrderSource>,
    /// Last update [ms]
    pub timestamp: u32,
    pub velocity: ChassisVelocity,
}

impl MotionOrder {
    fn empty(source: Option<OrderSource>) -> Self {
        Self {
            enabled: false,
            source,
            timestamp: 0,
            velocity: ChassisVelocity::zero(),
        }
    }

    fn clear(&mut self) {
        self.enabled = false;
        self.velocity = ChassisVelocity::zero();
    }
}

#[derive(Debug, Clone)]
pub struct MotionOrders {
    api: MotionOrder,
    joystick: MotionOrder,
    // Backing parameters of the joystick order, may be edited out of band
    joystick_params: ChassisVelocity,
    programs: [MotionOrder; PROGRAM_SLOTS],
}

impl Default for MotionOrders {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionOrders {
    pub fn new() -> Self {
        Self {
            api: MotionOrder::empty(Some(OrderSource::Api)),
            joystick: MotionOrder::empty(Some(OrderSource::Joystick)),
            joystick_params: ChassisVelocity::zero(),
            programs: [MotionOrder::empty(None); PROGRAM_SLOTS],
        }
    }

    pub fn set_api_order(&mut self, velocity: ChassisVelocity) {
        self.api.enabled = true;
        self.api.velocity = velocity;
    }

    /// Drop the API order, used when its source went silent
    pub fn disable_api(&mut self) {
        self.api.clear();
    }

    pub fn set_joystick_order(&mut self, velocity: ChassisVelocity) {
        self.joystick_params = velocity;
        self.joystick.enabled = true;
        self.joystick.velocity = velocity;
    }

    pub fn joystick_params(&self) -> ChassisVelocity {
        self.joystick_params
    }

    /// Live joystick parameters, picked up on the next `aggregate`
    pub fn joystick_params_mut(&mut self) -> &mut ChassisVelocity {
        &mut self.joystick_params
    }

    /// Set the order of a program, allocating a slot on its first request
    ///
    /// When every slot is taken the least recently updated one is evicted.
    pub fn set_program_order(&mut self, program: u32, now_ms: u32, velocity: ChassisVelocity) {
        let source = Some(OrderSource::Program(program));

        let index = match self.programs.iter().position(|o| o.source == source) {
            Some(index) => index,
            None => {
                let index = self
                    .programs
                    .iter()
                    .position(|o| o.source.is_none())
                    .unwrap_or_else(|| self.oldest_program_slot());
                self.programs[index].source = source;
                index
            }
        };

        let order = &mut self.programs[index];
        order.enabled = true;
        order.timestamp = now_ms;
        order.velocity = velocity;
    }

    fn oldest_program_slot(&self) -> usize {
        self.programs
            .iter()
            .enumerate()
            .min_by_key(|(_, o)| o.timestamp)
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    /// Enable or disable the order of a program, unknown programs are ignored
    pub fn set_program_enabled(&mut self, program: u32, enabled: bool) {
        let source = Some(OrderSource::Program(program));
        if let Some(order) = self.programs.iter_mut().find(|o| o.source == source) {
            order.enabled = enabled;
        }
    }

    pub fn program_order(&self, program: u32) -> Option<&MotionOrder> {
        let source = Some(OrderSource::Program(program));
        self.programs.iter().find(|o| o.source == source)
    }

    /// Every slot, joystick and API first
    pub fn orders(&self) -> impl Iterator<Item = &MotionOrder> {
        [&self.api, &self.joystick].into_iter().chain(self.programs.iter())
    }

    /// Sum of all enabled orders
    pub fn aggregate(&mut self) -> ChassisVelocity {
        let params = self.joystick_params;
        self.set_joystick_order(params);

        self.orders()
            .filter(|o| o.enabled)
            .fold(ChassisVelocity::zero(), |acc, o| acc + o.velocity)
    }

    /// Disable and zero every order
    pub fn emergency_stop(&mut self) {
        self.joystick_params = ChassisVelocity::zero();
        self.api.clear();
        self.joystick.clear();
        for order in &mut self.programs {
            order.clear();
        }
    }
}
