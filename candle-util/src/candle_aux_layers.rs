use crate::candle_loss_functions::softplus;
use candle_core::{Result, Tensor};
use candle_nn::Module;

/// Activations of the encoder layers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerAct {
    Tanh,
    Softplus,
}

impl Module for LayerAct {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            LayerAct::Tanh => x.tanh(),
            LayerAct::Softplus => softplus(x),
        }
    }
}

/// each layer is followed by its own activation
pub struct StackLayers<M>
where
    M: Module,
{
    layers: Vec<(M, LayerAct)>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, act) in self.layers.iter() {
            x = act.forward(&module.forward(&x)?)?;
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: LayerAct) {
        self.layers.push((layer, activation));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}
