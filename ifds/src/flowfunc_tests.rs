use itertools::Itertools;

use super::flowfunc::*;

fn sorted(facts: Vec<&'static str>) -> Vec<&'static str> {
    facts.into_iter().sorted().collect()
}

#[test]
fn identity_passes_everything() {
    assert_eq!(Identity.targets(&"a"), vec!["a"]);
    assert_eq!(Identity.targets(&"b"), vec!["b"]);
}

#[test]
fn kill_drops_exactly_one_fact() {
    let kill = Kill { fact: "a" };
    assert_eq!(kill.targets(&"a"), Vec::<&str>::new());
    assert_eq!(kill.targets(&"b"), vec!["b"]);
}

#[test]
fn gen_emits_on_trigger() {
    let r#gen = Gen {
        fact: "new",
        trigger: "zero",
    };
    assert_eq!(sorted(r#gen.targets(&"zero")), vec!["new", "zero"]);
    assert_eq!(r#gen.targets(&"other"), vec!["other"]);
}

#[test]
fn transfer_models_a_copy() {
    let transfer = Transfer {
        to: "a",
        from: "b",
    };
    // The source of the copy keeps holding and the target starts holding.
    assert_eq!(sorted(transfer.targets(&"b")), vec!["a", "b"]);
    // Whatever held for the target before the copy is overwritten.
    assert_eq!(transfer.targets(&"a"), Vec::<&str>::new());
    assert_eq!(transfer.targets(&"c"), vec!["c"]);
}

#[test]
fn kill_all_drops_everything() {
    assert_eq!(KillAll.targets(&"a"), Vec::<&str>::new());
    assert_eq!(KillAll.targets(&"zero"), Vec::<&str>::new());
}

#[test]
fn closures_are_flow_functions() {
    let branch = |d: &u32| vec![*d, *d + 10];
    assert_eq!(branch.targets(&1), vec![1, 11]);
}
