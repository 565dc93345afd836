use crate::error::{Result, SsfError};
use crate::types::ArimaOrder;

/// Unpacked ARIMA coefficients.
///
/// Layout (flat vector order): `[ar(p) | ma(q) | sar(P) | sma(Q) | sigma2?]`
///
/// When the innovation variance is concentrated out of the likelihood,
/// `sigma2` is `None` and the state space is built with unit variance.
#[derive(Debug, Clone, PartialEq)]
pub struct ArimaParams {
    pub ar_coeffs: Vec<f64>,
    pub ma_coeffs: Vec<f64>,
    pub sar_coeffs: Vec<f64>,
    pub sma_coeffs: Vec<f64>,
    pub sigma2: Option<f64>,
}

impl ArimaParams {
    /// Airline model coefficients `theta` (regular MA) and `btheta` (seasonal MA).
    pub fn airline(theta: f64, btheta: f64) -> Self {
        Self {
            ar_coeffs: vec![],
            ma_coeffs: vec![theta],
            sar_coeffs: vec![],
            sma_coeffs: vec![btheta],
            sigma2: None,
        }
    }

    /// Unpack a flat parameter vector into structured fields.
    pub fn from_flat(flat: &[f64], order: &ArimaOrder, concentrated: bool) -> Result<Self> {
        let expected = order.n_coefficients() + if concentrated { 0 } else { 1 };
        if flat.len() != expected {
            return Err(SsfError::ParamLengthMismatch {
                expected,
                got: flat.len(),
            });
        }

        let mut i = 0;
        let ar_coeffs = flat[i..i + order.p].to_vec();
        i += order.p;
        let ma_coeffs = flat[i..i + order.q].to_vec();
        i += order.q;
        let sar_coeffs = flat[i..i + order.pp].to_vec();
        i += order.pp;
        let sma_coeffs = flat[i..i + order.qq].to_vec();
        i += order.qq;
        let sigma2 = if concentrated { None } else { Some(flat[i]) };

        let params = Self {
            ar_coeffs,
            ma_coeffs,
            sar_coeffs,
            sma_coeffs,
            sigma2,
        };
        params.validate()?;
        Ok(params)
    }

    /// Pack structured fields back into a flat vector.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut v = Vec::new();
        v.extend(&self.ar_coeffs);
        v.extend(&self.ma_coeffs);
        v.extend(&self.sar_coeffs);
        v.extend(&self.sma_coeffs);
        if let Some(s) = self.sigma2 {
            v.push(s);
        }
        v
    }

    /// Innovation variance used by the state space (1 when concentrated).
    pub fn variance(&self) -> f64 {
        self.sigma2.unwrap_or(1.0)
    }

    /// Checks that the coefficient counts match `order` and values are finite.
    pub fn check_order(&self, order: &ArimaOrder) -> Result<()> {
        let counts = [
            (self.ar_coeffs.len(), order.p),
            (self.ma_coeffs.len(), order.q),
            (self.sar_coeffs.len(), order.pp),
            (self.sma_coeffs.len(), order.qq),
        ];
        for (got, expected) in counts {
            if got != expected {
                return Err(SsfError::ParamLengthMismatch { expected, got });
            }
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.to_flat().iter().any(|c| !c.is_finite()) {
            return Err(SsfError::Configuration(
                "ARIMA coefficients must be finite".into(),
            ));
        }
        if let Some(s) = self.sigma2 {
            if s <= 0.0 {
                return Err(SsfError::Configuration(format!(
                    "innovation variance must be positive, got {}",
                    s
                )));
            }
        }
        Ok(())
    }
}
