//! Model family classification from a model name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Architecture or training-objective family used to group results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFamily {
    #[serde(rename = "CLIP")]
    Clip,
    #[serde(rename = "ALIGN")]
    Align,
    #[serde(rename = "BASIC")]
    Basic,
    #[serde(rename = "SSL")]
    Ssl,
    #[serde(rename = "ViT")]
    Vit,
    EfficientNet,
    ResNet,
    #[serde(rename = "VGG")]
    Vgg,
    AlexNet,
    Inception,
    DenseNet,
    MobileNet,
    ConvNeXt,
    /// Convolutional network without a more specific family.
    #[serde(rename = "CNN")]
    Cnn,
    Other,
}

/// Ordered rules; the first family with a matching substring wins, so
/// specific families precede the generic CNN tag.
const RULES: &[(ModelFamily, &[&str])] = &[
    (ModelFamily::Clip, &["clip"]),
    (ModelFamily::Align, &["align"]),
    (ModelFamily::Basic, &["basic"]),
    (
        ModelFamily::Ssl,
        &[
            "simclr", "moco", "byol", "swav", "barlowtwins", "barlow_twins", "vicreg", "dino",
            "jigsaw", "rotnet", "pirl", "ssl",
        ],
    ),
    (ModelFamily::Vit, &["vit", "deit"]),
    (ModelFamily::EfficientNet, &["efficientnet"]),
    (ModelFamily::ResNet, &["resnet", "resnext"]),
    (ModelFamily::Vgg, &["vgg"]),
    (ModelFamily::AlexNet, &["alexnet"]),
    (ModelFamily::Inception, &["inception", "googlenet"]),
    (ModelFamily::DenseNet, &["densenet"]),
    (ModelFamily::MobileNet, &["mobilenet"]),
    (ModelFamily::ConvNeXt, &["convnext"]),
    (
        ModelFamily::Cnn,
        &["cornet", "squeezenet", "shufflenet", "mnasnet", "regnet", "nasnet", "cnn"],
    ),
];

impl ModelFamily {
    pub fn classify(model_name: &str) -> Self {
        let name = model_name.to_lowercase();
        RULES
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| name.contains(p)))
            .map_or(Self::Other, |(family, _)| *family)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clip => "CLIP",
            Self::Align => "ALIGN",
            Self::Basic => "BASIC",
            Self::Ssl => "SSL",
            Self::Vit => "ViT",
            Self::EfficientNet => "EfficientNet",
            Self::ResNet => "ResNet",
            Self::Vgg => "VGG",
            Self::AlexNet => "AlexNet",
            Self::Inception => "Inception",
            Self::DenseNet => "DenseNet",
            Self::MobileNet => "MobileNet",
            Self::ConvNeXt => "ConvNeXt",
            Self::Cnn => "CNN",
            Self::Other => "Other",
        }
    }

    pub fn is_convolutional(&self) -> bool {
        matches!(
            self,
            Self::EfficientNet
                | Self::ResNet
                | Self::Vgg
                | Self::AlexNet
                | Self::Inception
                | Self::DenseNet
                | Self::MobileNet
                | Self::ConvNeXt
                | Self::Cnn
        )
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
