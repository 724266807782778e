use nalgebra::*;
use structopt::StructOpt;
use indicatif::ProgressBar;
use rand::prelude::*;
use anyhow::Result;
use expfam::model::{ConjugateModel, Mixture, NormalDiagonalCovariance};

/// Fits a Bayesian Gaussian mixture to synthetic two-cluster data with
/// stochastic natural-gradient updates, reporting an ELBO-style objective.
#[derive(Debug, StructOpt)]
#[structopt(name = "gmm")]
struct Opt {

    /// Number of mixture components
    #[structopt(short = "k", long, default_value = "2")]
    components : usize,

    /// Training epochs
    #[structopt(long, default_value = "20")]
    epochs : usize,

    /// Mini-batch size
    #[structopt(long, default_value = "60")]
    batch : usize,

    /// Learning rate of the natural-gradient steps
    #[structopt(long, default_value = "0.5")]
    lrate : f64

}

fn main() -> Result<()> {
    let opt = Opt::from_args();
    let mut rng = rand::thread_rng();

    // Two well-separated spherical clusters.
    let centers = [[-2.0, 0.0], [2.0, 1.0]];
    let n = 600;
    let mut data = DMatrix::zeros(n, 2);
    for i in 0..n {
        for j in 0..2 {
            let z : f64 = rng.sample(rand_distr::StandardNormal);
            data[(i, j)] = centers[i % 2][j] + 0.5 * z;
        }
    }

    let global_mean = data.row_mean().transpose();
    let precision = DVector::from_element(2, 1.0);
    let mut components = Vec::with_capacity(opt.components);
    for _ in 0..opt.components {
        components.push(NormalDiagonalCovariance::create(&global_mean, &precision, 1.0, true)?);
    }
    let counts = DVector::from_element(opt.components, 1.0);
    let mut mixture = Mixture::new(&counts, components)?;

    let scale = n as f64 / opt.batch as f64;
    let pb = ProgressBar::new((opt.epochs * (n / opt.batch)) as u64);
    let mut elbo = 0.0;
    for _ in 0..opt.epochs {
        let mut order : Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);
        for chunk in order.chunks(opt.batch) {
            let mut batch = DMatrix::zeros(chunk.len(), 2);
            for (bi, ix) in chunk.iter().enumerate() {
                batch.row_mut(bi).copy_from(&data.row(*ix));
            }
            let (llh, acc) = mixture.exp_llh_with_stats(batch.slice((0, 0), batch.shape()))?;
            mixture.natural_grad_update(&acc, scale, opt.lrate)?;
            elbo = llh.mean() - mixture.kl_div_posterior_prior()? / n as f64;
            pb.inc(1);
        }
    }
    pb.finish_and_clear();

    println!("ELBO estimate: {:.4}", elbo);
    println!("expected weights: {}", mixture.weights().transpose());
    for (i, comp) in mixture.components().iter().enumerate() {
        println!(
            "component {}: mean = {} precision = {}",
            i,
            comp.mean().transpose(),
            comp.precision().transpose()
        );
    }
    Ok(())
}
