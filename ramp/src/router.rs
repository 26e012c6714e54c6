//! Maps (action, key) to an ordered list of datastore locations.

use crate::error::CResult;
use crate::storage::Location;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Write,
    Search,
    Index,
}

/// Routing is a pure function of configuration: no I/O, deterministic
/// output, possibly empty. Implementations may return the same set for all
/// actions, disjoint sets, or anything between.
pub trait Router: Send + Sync {
    fn lookup(&self, action: Action, kid: &str) -> CResult<Vec<String>>;
}

fn location(region: &str, name: &str) -> String {
    Location::new("memory", region, name).to_string()
}

/// Single replica: one location serves every action.
pub struct RouterOne {
    route: Vec<String>,
}

impl RouterOne {
    pub fn new(name: &str, region: &str) -> Self {
        RouterOne { route: vec![location(region, name)] }
    }
}

impl Router for RouterOne {
    fn lookup(&self, _action: Action, _kid: &str) -> CResult<Vec<String>> {
        Ok(self.route.clone())
    }
}

/// Two fully replicated locations for every action.
pub struct RouterTwo {
    route: Vec<String>,
}

impl RouterTwo {
    pub fn new(name: &str, region: &str) -> Self {
        RouterTwo {
            route: vec![
                location(region, &format!("{}1", name)),
                location(region, &format!("{}2", name)),
            ],
        }
    }
}

impl Router for RouterTwo {
    fn lookup(&self, _action: Action, _kid: &str) -> CResult<Vec<String>> {
        Ok(self.route.clone())
    }
}

/// Unbalanced router: writes go to both locations, reads only to the
/// first. Pairs with [`RouterRead2`] to observe one-sided commit failures.
pub struct RouterRead1 {
    read: Vec<String>,
    write: Vec<String>,
}

impl RouterRead1 {
    pub fn new(name: &str, region: &str) -> Self {
        let one = location(region, &format!("{}1", name));
        let two = location(region, &format!("{}2", name));
        RouterRead1 { read: vec![one.clone()], write: vec![one, two] }
    }
}

impl Router for RouterRead1 {
    fn lookup(&self, action: Action, _kid: &str) -> CResult<Vec<String>> {
        match action {
            Action::Read => Ok(self.read.clone()),
            _ => Ok(self.write.clone()),
        }
    }
}

/// Unbalanced router: writes go to both locations, reads only to the
/// second.
pub struct RouterRead2 {
    read: Vec<String>,
    write: Vec<String>,
}

impl RouterRead2 {
    pub fn new(name: &str, region: &str) -> Self {
        let one = location(region, &format!("{}1", name));
        let two = location(region, &format!("{}2", name));
        RouterRead2 { read: vec![two.clone()], write: vec![one, two] }
    }
}

impl Router for RouterRead2 {
    fn lookup(&self, action: Action, _kid: &str) -> CResult<Vec<String>> {
        match action {
            Action::Read => Ok(self.read.clone()),
            _ => Ok(self.write.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn router_one_same_for_all_actions() -> CResult<()> {
        let r = RouterOne::new("data", "mem-1");
        for action in [Action::Read, Action::Write, Action::Search, Action::Index] {
            assert_eq!(r.lookup(action, "k")?, vec!["memory|mem-1|data".to_string()]);
        }
        Ok(())
    }

    #[test]
    fn router_two_replicates() -> CResult<()> {
        let r = RouterTwo::new("data", "mem-1");
        assert_eq!(
            r.lookup(Action::Write, "k")?,
            vec!["memory|mem-1|data1".to_string(), "memory|mem-1|data2".to_string()]
        );
        assert_eq!(r.lookup(Action::Read, "k")?, r.lookup(Action::Write, "k")?);
        Ok(())
    }

    #[test]
    fn unbalanced_readers() -> CResult<()> {
        let r1 = RouterRead1::new("data", "mem-1");
        assert_eq!(r1.lookup(Action::Read, "k")?, vec!["memory|mem-1|data1".to_string()]);
        assert_eq!(r1.lookup(Action::Write, "k")?.len(), 2);

        let r2 = RouterRead2::new("data", "mem-1");
        assert_eq!(r2.lookup(Action::Read, "k")?, vec!["memory|mem-1|data2".to_string()]);
        assert_eq!(r2.lookup(Action::Write, "k")?.len(), 2);
        Ok(())
    }

    #[test]
    fn lookup_is_deterministic() -> CResult<()> {
        let r = RouterTwo::new("data", "mem-1");
        assert_eq!(r.lookup(Action::Read, "a")?, r.lookup(Action::Read, "b")?);
        Ok(())
    }
}
