use kube::core::CustomResourceExt;
use vmsingle_operator::crds::{service_scrape::VMServiceScrape, vmsingle::VMSingle};

fn main() {
    let crds = vec![VMSingle::crd(), VMServiceScrape::crd()];
    for (i, crd) in crds.into_iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        println!("{}", serde_yaml::to_string(&crd).expect("serialize crd"));
    }
}
