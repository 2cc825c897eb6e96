/// A distributive fact transformer attached to an edge of the
/// interprocedural control-flow graph.
///
/// Must be total: every fact maps to a (possibly empty) set of facts, and an
/// empty result kills the source fact. Implementations for closures are
/// provided, so most clients never define their own types:
///
/// ```
/// # use ifds::flowfunc::FlowFunction;
/// let double = |d: &u32| vec![*d, *d * 2];
/// assert_eq!(double.targets(&3), vec![3, 6]);
/// ```
pub trait FlowFunction<D>: Send + Sync {
    /// The facts holding after the edge, given that `source` held before it.
    fn targets(&self, source: &D) -> Vec<D>;
}

impl<D, F> FlowFunction<D> for F
where
    F: Fn(&D) -> Vec<D> + Send + Sync,
{
    fn targets(&self, source: &D) -> Vec<D> {
        self(source)
    }
}

/// Passes every fact through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl<D: Clone> FlowFunction<D> for Identity {
    fn targets(&self, source: &D) -> Vec<D> {
        vec![source.clone()]
    }
}

/// Drops exactly one fact and passes everything else through.
#[derive(Clone, Debug)]
pub struct Kill<D> {
    pub fact: D,
}

impl<D: Clone + Eq + Send + Sync> FlowFunction<D> for Kill<D> {
    fn targets(&self, source: &D) -> Vec<D> {
        if *source == self.fact {
            vec![]
        } else {
            vec![source.clone()]
        }
    }
}

/// Passes the source through and additionally emits `fact` whenever the
/// source equals `trigger`. With the zero fact as the trigger this is the
/// canonical way to introduce a fact out of nothing.
#[derive(Clone, Debug)]
pub struct Gen<D> {
    pub fact: D,
    pub trigger: D,
}

impl<D: Clone + Eq + Send + Sync> FlowFunction<D> for Gen<D> {
    fn targets(&self, source: &D) -> Vec<D> {
        if *source == self.trigger {
            vec![source.clone(), self.fact.clone()]
        } else {
            vec![source.clone()]
        }
    }
}

/// Models a copy `to := from`: the fact for `from` additionally starts
/// holding for `to`, while any previous fact for `to` is overwritten.
#[derive(Clone, Debug)]
pub struct Transfer<D> {
    pub to: D,
    pub from: D,
}

impl<D: Clone + Eq + Send + Sync> FlowFunction<D> for Transfer<D> {
    fn targets(&self, source: &D) -> Vec<D> {
        if *source == self.from {
            vec![source.clone(), self.to.clone()]
        } else if *source == self.to {
            vec![]
        } else {
            vec![source.clone()]
        }
    }
}

/// Drops every fact. Used for return edges whose exit statement does not
/// have the shape the client expected, so that nothing leaks back into the
/// caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct KillAll;

impl<D> FlowFunction<D> for KillAll {
    fn targets(&self, _source: &D) -> Vec<D> {
        vec![]
    }
}
