use std::borrow::Cow;

use crate::pricing::duals::DualPrices;
use crate::pricing::{PricingType, StabilizationSettings};
use crate::ui::{UISender, UIUserMessage};
use crate::{DUAL_FEAS_TOL, INT_FEAS_TOL};

/// Smoothing state of one node
#[derive(Clone, Debug)]
pub struct StabilizationState {
    pub center: Option<DualPrices>,
    /// lower bound that was obtained with the center
    pub center_bound: f64,
    pub alpha: f64,
    pub in_mispricing_schedule: bool,
    /// smoothed distance between the duals of a round and the center
    pub subgradient_norm_estimate: f64,
}

impl StabilizationState {
    fn new(alpha: f64) -> Self {
        StabilizationState {
            center: None,
            center_bound: f64::NEG_INFINITY,
            alpha,
            in_mispricing_schedule: false,
            subgradient_norm_estimate: 0.0,
        }
    }
}

/// What changed in a round update
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct StabilizationUpdate {
    pub center_moved: bool,
    pub misprice: bool,
}

/// Wentges smoothing of the dual prices with mispricing schedule
pub struct StabilizationController {
    settings: StabilizationSettings,
    pricing_type: PricingType,
    enabled: bool,
    state: StabilizationState,
    ui: UISender,
}

impl StabilizationController {
    pub fn new(settings: StabilizationSettings, ui: UISender) -> Self {
        let alpha = settings.initial_smoothing_alpha;
        StabilizationController {
            settings,
            pricing_type: PricingType::ReducedCost,
            enabled: true,
            state: StabilizationState::new(alpha),
            ui,
        }
    }

    fn initial_alpha(&self) -> f64 {
        match self.pricing_type {
            PricingType::ReducedCost => self.settings.initial_smoothing_alpha,
            PricingType::Farkas => self.settings.farkas_alpha,
        }
    }

    /// Forget the center, a new node starts.
    pub fn reset_node(&mut self) {
        self.state = StabilizationState::new(self.initial_alpha());
    }

    /// Prepare for a pricing phase. Centers are not shared between
    /// reduced cost and Farkas pricing.
    pub fn begin_phase(&mut self, pricing_type: PricingType, enabled: bool) {
        self.enabled = enabled;
        if pricing_type != self.pricing_type {
            self.pricing_type = pricing_type;
            self.reset_node();
        } else if !self.settings.cross_iteration_memory {
            self.state.alpha = self.initial_alpha();
            self.state.in_mispricing_schedule = false;
        }
    }

    pub fn is_stabilized(&self) -> bool {
        self.enabled && self.state.center.is_some() && self.state.alpha > INT_FEAS_TOL
    }

    /// Duals handed to the pricing problems.
    /// Without center, or with alpha = 0, the raw duals are used unchanged.
    pub fn stabilized_duals<'a>(&self, raw_duals: &'a DualPrices) -> Cow<'a, DualPrices> {
        match (&self.state.center, self.is_stabilized()) {
            (Some(center), true) => center.linear_combination(self.state.alpha, raw_duals),
            _ => Cow::Borrowed(raw_duals),
        }
    }

    /// Update center and alpha after a round has been evaluated.
    ///
    /// `new_duals` are the duals the round was priced with, `candidate_lower_bound`
    /// the Lagrangian bound they gave.
    pub fn on_round_complete(&mut self, all_optimal: bool, any_improving: bool, candidate_lower_bound: f64, new_duals: &DualPrices, was_stabilized: bool) -> StabilizationUpdate {
        let mut update = StabilizationUpdate::default();
        if !self.enabled {
            return update;
        }

        if let Some(center) = &self.state.center {
            let distance = new_duals.distance(center);
            self.state.subgradient_norm_estimate = 0.5 * self.state.subgradient_norm_estimate + 0.5 * distance;
        }

        if all_optimal && self.improves_center(candidate_lower_bound) {
            self.state.center = Some(new_duals.clone());
            if candidate_lower_bound.is_finite() {
                self.state.center_bound = candidate_lower_bound;
            }
            update.center_moved = true;
            self.ui.send(UIUserMessage::StabilityCenterMoved { lower_bound: candidate_lower_bound });
        }

        if !any_improving {
            if was_stabilized {
                // misprice: trust the center less, monotonically
                self.state.in_mispricing_schedule = true;
                let step = match self.pricing_type {
                    PricingType::ReducedCost => self.settings.alpha_steps_down,
                    PricingType::Farkas => self.settings.farkas_steps_down,
                };
                self.state.alpha = (self.state.alpha - step).max(0.0);
                if self.state.alpha < INT_FEAS_TOL {
                    self.state.alpha = 0.0;
                }
                update.misprice = true;
                self.ui.send(UIUserMessage::Misprice { alpha: self.state.alpha });
            } else {
                self.state.in_mispricing_schedule = false;
            }
        } else {
            self.state.in_mispricing_schedule = false;
            self.state.alpha = match self.pricing_type {
                PricingType::ReducedCost => {
                    let ceiling = self.settings.maximum_smoothing_alpha;
                    if self.state.alpha < ceiling {
                        (self.state.alpha + self.settings.alpha_steps_up).min(ceiling)
                    } else {
                        ceiling
                    }
                }
                PricingType::Farkas => self.settings.farkas_alpha,
            };
        }

        #[cfg(feature = "validity_assertions")]
        assert!((0.0..1.0).contains(&self.state.alpha));

        update
    }

    fn improves_center(&self, candidate_lower_bound: f64) -> bool {
        match self.pricing_type {
            PricingType::ReducedCost => {
                candidate_lower_bound.is_finite() && candidate_lower_bound > self.state.center_bound + DUAL_FEAS_TOL
            }
            // no bound in Farkas pricing, every optimal round moves the center
            PricingType::Farkas => true,
        }
    }

    pub fn state(&self) -> &StabilizationState {
        &self.state
    }

    pub fn alpha(&self) -> f64 {
        self.state.alpha
    }

    pub fn center(&self) -> Option<&DualPrices> {
        self.state.center.as_ref()
    }

    pub fn in_mispricing_schedule(&self) -> bool {
        self.state.in_mispricing_schedule
    }

    pub fn pricing_type(&self) -> PricingType {
        self.pricing_type
    }
}
