//! Elastic rewriting of soft inequalities.
//!
//! A soft `lhs <= rhs` becomes the hard row `lhs - s <= rhs` with a slack
//! `s` in `[0, 20000]`, plus the soft equality `s = 0` carrying the original
//! penalties. A soft `>=` gets `+s` instead. The slack, its bound and the
//! penalty constraint always come and go together.

use log::trace;

use crate::linear_spec::LinearSpec;
use crate::model::{
    Constraint, ConstraintId, ConstraintRole, ElasticSlack, Summand, Variable, VariableId,
};
use crate::problem::ConstraintOp;

/// Upper end of a slack's range
pub const SLACK_MAX: f64 = 20000.0;

impl LinearSpec {
    /// Give a soft inequality its slack and penalty constraint.
    /// Does nothing for other constraints or if one is already attached.
    pub(crate) fn attach_elastic(&mut self, id: ConstraintId) {
        let Some(constraint) = self.constraints.get(id.0) else {
            return;
        };
        if constraint.elastic.is_some() || !constraint.is_soft_inequality() {
            return;
        }
        let coeff = match constraint.op {
            ConstraintOp::Le => -1.0,
            ConstraintOp::Ge => 1.0,
            ConstraintOp::Eq => return,
        };
        let (penalty_neg, penalty_pos) = (constraint.penalty_neg, constraint.penalty_pos);

        let mut var = Variable::new();
        var.slack = true;
        let slack = VariableId(self.variables.insert(var));
        self.apply_range(slack, 0.0, SLACK_MAX);

        let summand = Summand::new(coeff, slack);
        if let Some(constraint) = self.constraints.get_mut(id.0) {
            constraint.left_side.push(summand);
        }
        self.retain(&[summand]);

        let penalty = Constraint::new(
            vec![Summand::new(1.0, slack)],
            ConstraintOp::Eq,
            0.0,
            penalty_neg,
            penalty_pos,
            ConstraintRole::SlackPenalty(id),
        );
        let penalty = self.register(penalty);

        if let Some(constraint) = self.constraints.get_mut(id.0) {
            constraint.elastic = Some(ElasticSlack { slack, coeff, penalty });
        }
        trace!("constraint {} elastic with slack {}", id.index(), slack.index());
    }

    /// Undo [`attach_elastic`](Self::attach_elastic): strip the slack summand,
    /// drop the penalty constraint and release the slack variable
    pub(crate) fn detach_elastic(&mut self, id: ConstraintId) {
        let Some(elastic) = self.constraints.get_mut(id.0).and_then(|c| c.elastic.take()) else {
            return;
        };

        let mut removed = Vec::new();
        if let Some(constraint) = self.constraints.get_mut(id.0) {
            constraint.left_side.retain(|s| {
                let keep = s.var != elastic.slack;
                if !keep {
                    removed.push(*s);
                }
                keep
            });
        }
        self.release(&removed);

        self.drop_constraint(elastic.penalty);
        self.drop_variable(elastic.slack);
        trace!("constraint {} no longer elastic", id.index());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_is_idempotent() {
        let mut spec = LinearSpec::new();
        let x = spec.add_variable();
        let c = spec
            .add_soft_constraint(&[1.0], &[x], ConstraintOp::Le, 4.0, 1.0, 1.0)
            .expect("valid");
        spec.attach_elastic(c);

        assert_eq!(spec.constraint(c).expect("live").left_side().len(), 2);
        assert_eq!(spec.variable_count(), 2);
    }

    #[test]
    fn test_hard_and_equality_constraints_stay_rigid() {
        let mut spec = LinearSpec::new();
        let x = spec.add_variable();
        let hard = spec.add_constraint(&[1.0], &[x], ConstraintOp::Le, 4.0).expect("valid");
        let soft_eq = spec
            .add_soft_constraint(&[1.0], &[x], ConstraintOp::Eq, 4.0, 5.0, 5.0)
            .expect("valid");

        assert!(spec.constraint(hard).and_then(Constraint::elastic).is_none());
        assert!(spec.constraint(soft_eq).and_then(Constraint::elastic).is_none());
        assert_eq!(spec.variable_count(), 1);
    }

    #[test]
    fn test_detach_restores_left_side() {
        let mut spec = LinearSpec::new();
        let x = spec.add_variable();
        let y = spec.add_variable();
        let c = spec
            .add_soft_constraint(&[2.0, -1.0], &[x, y], ConstraintOp::Ge, 0.0, 0.0, 3.0)
            .expect("valid");
        let elastic = *spec.constraint(c).and_then(Constraint::elastic).expect("elastic");
        assert!(spec.variable(elastic.slack).expect("slack").is_used());

        spec.detach_elastic(c);
        assert_eq!(
            spec.constraint(c).expect("live").left_side(),
            &[Summand::new(2.0, x), Summand::new(-1.0, y)]
        );
        assert!(spec.constraint(elastic.penalty).is_none());
        assert!(spec.variable(elastic.slack).is_none());
        assert_eq!(spec.constraint_count(), 1);

        // detaching twice is harmless
        spec.detach_elastic(c);
        assert_eq!(spec.constraint_count(), 1);
    }
}
