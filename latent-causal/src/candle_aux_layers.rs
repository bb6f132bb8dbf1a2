use candle_core::{Result, Tensor};
use candle_nn::{Activation, Linear, Module, VarBuilder};

/// Negative slope of the leaky rectifier between hidden layers
pub const LEAKY_SLOPE: f64 = 0.01;

/// build a stack of alternating `M` and `A` layers
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> Module for StackLayers<M>
where
    M: Module,
{
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut x = input.clone();
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            x = module.forward(&x)?;
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act(&mut self, layer: M, activation: Activation) {
        self.module_layers.push(layer);
        self.activation_layers.push(Some(activation));
    }

    pub fn push(&mut self, layer: M) {
        self.module_layers.push(layer);
        self.activation_layers.push(None);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
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

/// Small feed-forward regressor used for every per-unit function
/// (encoder latents, decoder grid locations, transition heads).
///
/// `lin0 -> [leaky -> lin1 -> ... -> leaky -> lin{L}]`, so there is no
/// nonlinearity after the last linear map and `num_layers == 0`
/// degenerates to a single affine map.
pub struct FeatureMlp {
    num_layers: usize,
    num_hidden: usize,
    num_input: usize,
    num_output: usize,
    layers: StackLayers<Linear>,
}

impl FeatureMlp {
    /// Will create these variables:
    /// * `lin{l}.weight` and `lin{l}.bias` for `l = 0..=num_layers`
    ///
    /// # Arguments
    /// * `num_layers` - number of hidden layers
    /// * `num_hidden` - width of each hidden layer
    /// * `num_input` - input width
    /// * `num_output` - output width
    /// * `vb` - variable builder
    pub fn new(
        num_layers: usize,
        num_hidden: usize,
        num_input: usize,
        num_output: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let act = Activation::LeakyRelu(LEAKY_SLOPE);
        let mut layers = StackLayers::<Linear>::new();

        if num_layers == 0 {
            layers.push(candle_nn::linear(num_input, num_output, vb.pp("lin0"))?);
        } else {
            layers.push_with_act(
                candle_nn::linear(num_input, num_hidden, vb.pp("lin0"))?,
                act.clone(),
            );
            for l in 0..num_layers {
                let name = format!("lin{}", l + 1);
                if l + 1 == num_layers {
                    layers.push(candle_nn::linear(num_hidden, num_output, vb.pp(name))?);
                } else {
                    layers.push_with_act(
                        candle_nn::linear(num_hidden, num_hidden, vb.pp(name))?,
                        act.clone(),
                    );
                }
            }
        }

        Ok(Self {
            num_layers,
            num_hidden,
            num_input,
            num_output,
            layers,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    pub fn num_hidden(&self) -> usize {
        self.num_hidden
    }

    pub fn num_input(&self) -> usize {
        self.num_input
    }

    pub fn num_output(&self) -> usize {
        self.num_output
    }
}

impl Module for FeatureMlp {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.layers.forward(x)
    }
}
