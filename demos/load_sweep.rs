use nrpower::{prelude::*, testcases};

/// Ramps the load of the three node test network and compares warm-started
/// solves with cold ones.
fn main() -> Result<()> {
    let (y, types, v_target, s) = testcases::three_node();
    let config = NewtonRaphsonConfig::default();

    let mut cold = NewtonRaphson::new(config)?;
    cold.set_admittance_matrix(y.clone())?;
    cold.set_node_types(&types)?;
    cold.set_target_voltages(v_target.clone())?;

    let mut nr = NewtonRaphson::new(config)?;
    nr.set_admittance_matrix(y)?;
    nr.set_node_types(&types)?;
    nr.set_target_voltages(v_target)?;
    let mut warm = WarmStart::new(nr, WarmStartConfig::default())?;

    let (mut warm_total, mut cold_total) = (0, 0);
    for step in 0..=20 {
        let factor = 1.0 + 0.02 * step as f64;
        let injection = PowerInjection::new(s.map(|s| s * factor));

        let w = warm.solve(&injection, None, false)?;
        let c = cold.solve(&injection, None)?;
        assert!(w.is_valid() && c.is_valid());
        warm_total += w.iterations();
        cold_total += c.iterations();
        println!(
            "load {:>5.2} | start {:<9} | warm {} it | cold {} it | |V2| = {:.6}",
            factor,
            format!("{:?}", warm.last_start()),
            w.iterations(),
            c.iterations(),
            w.voltages()[2].norm()
        );
    }
    println!("total iterations: warm {warm_total}, cold {cold_total}");

    let last = warm.solve(&PowerInjection::new(s.map(|s| s * 1.4)), None, false)?;
    println!("{}", last.to_table());
    println!("{}", last.evaluation());
    Ok(())
}
