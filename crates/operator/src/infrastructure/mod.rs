pub mod k8s;
pub mod kube_store;
pub mod memory_store;
