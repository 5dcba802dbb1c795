use super::{DriverParams, TickContext, TurnSignal, Vehicle};
use crate::graph::{LaneGraph, Side, TurnDirection};
use cgmath::MetricSpace;

impl From<Side> for TurnSignal {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => TurnSignal::Left,
            Side::Right => TurnSignal::Right,
        }
    }
}

impl From<TurnDirection> for TurnSignal {
    fn from(turn: TurnDirection) -> Self {
        match turn {
            TurnDirection::Straight => TurnSignal::Off,
            TurnDirection::Left => TurnSignal::Left,
            TurnDirection::Right => TurnSignal::Right,
        }
    }
}

impl Vehicle {
    /// Chooses the turn signal and blinks it.
    pub(crate) fn update_turn_signal(&mut self, ctx: &TickContext) {
        let turn = match self.lane_change {
            Some(lc) => lc.side.into(),
            None => self.upcoming_turn(ctx.graph, ctx.params.signal_distance),
        };

        let signals = &mut self.signals;
        if turn != signals.turn {
            signals.turn = turn;
            signals.blink_timer = 0.0;
        } else {
            signals.blink_timer += ctx.dt;
        }
        let period = ctx.params.blink_period;
        signals.lamp_on = turn != TurnSignal::Off && signals.blink_timer % period < 0.5 * period;
    }

    /// The turn of the current lane, or of the first turning lane starting within `range`.
    fn upcoming_turn(&self, graph: &LaneGraph, range: f64) -> TurnSignal {
        let current = graph.lane(self.lane).turn();
        if current != TurnDirection::Straight {
            return current.into();
        }
        self.lookahead
            .iter()
            .map(|lane| graph.lane(*lane))
            .take_while(|lane| lane.start_position().distance(self.position) < range)
            .map(|lane| lane.turn())
            .find(|turn| *turn != TurnDirection::Straight)
            .map_or(TurnSignal::Off, TurnSignal::from)
    }

    /// Lights the brake lights while any yield cause is within braking distance.
    pub(crate) fn update_brake_light(&mut self, params: &DriverParams) {
        let near = |distance: Option<f64>| distance.map_or(false, |d| d < params.braking_distance);
        self.signals.brake_light =
            near(self.obstacle()) || near(self.intersection_stop) || near(self.crosswalk_stop);
    }
}
