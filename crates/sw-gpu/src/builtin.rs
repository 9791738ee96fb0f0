//! Shader sources of the built-in stages.

use crate::shader_source::MemorySource;

/// Paths of the built-in shader files.
pub mod paths {
    pub const GLOBAL_SETTINGS: &str = "shaders/global_settings.glsl";
    pub const FRAG_SETTINGS: &str = "shaders/frag_shader_settings.glsl";
    pub const VERTEX: &str = "shaders/render_stage_vert.glsl";
    pub const AUDIO_HISTORY: &str = "shaders/audio_history.glsl";
    pub const SINE_GENERATOR: &str = "shaders/sine_generator.glsl";
    pub const CONSTANT_GENERATOR: &str = "shaders/constant_generator.glsl";
    pub const GAIN_EFFECT: &str = "shaders/gain_effect.glsl";
    pub const MULTITRACK_JOIN: &str = "shaders/multitrack_join.glsl";
    pub const ECHO_EFFECT: &str = "shaders/echo_effect.glsl";
    pub const FREQUENCY_FILTER_EFFECT: &str = "shaders/frequency_filter_effect.glsl";
    pub const TAPE_RECORD: &str = "shaders/tape_record.glsl";
    pub const TAPE_PLAYBACK: &str = "shaders/tape_playback.glsl";
    pub const FINAL_RENDER: &str = "shaders/final_render.glsl";

    /// Imports every built-in fragment shader is assembled with.
    pub const FRAG_IMPORTS: &[&str] = &[GLOBAL_SETTINGS, FRAG_SETTINGS];
    /// [`FRAG_IMPORTS`] plus the `audio_history_texture` lookup.
    pub const HISTORY_IMPORTS: &[&str] = &[GLOBAL_SETTINGS, FRAG_SETTINGS, AUDIO_HISTORY];
}

const GLOBAL_SETTINGS: &str = r#"#version 300 es
precision highp float;
precision highp int;
precision highp sampler2D;

layout(std140) uniform global_time {
    int global_time_val;
};
"#;

const FRAG_SETTINGS: &str = r#"#version 300 es
in vec2 TexCoord;

uniform sampler2D stream_audio_texture;
uniform int buffer_size;
uniform int num_channels;
uniform int sample_rate;

layout(location = 0) out vec4 output_audio_texture;
"#;

const VERTEX: &str = r#"#version 300 es
out vec2 TexCoord;

void main() {
    vec2 pos = vec2(float((gl_VertexID & 1) << 2), float((gl_VertexID & 2) << 1));
    TexCoord = pos * 0.5;
    gl_Position = vec4(pos - 1.0, 0.0, 1.0);
}
"#;

const SINE_GENERATOR: &str = r#"#version 300 es
uniform float tone;
uniform float gain;

void main() {
    float frame = float(global_time_val * buffer_size) + floor(gl_FragCoord.x);
    float phase = fract(frame * tone / float(sample_rate));
    output_audio_texture = vec4(gain * sin(6.28318530718 * phase), 0.0, 0.0, 1.0);
}
"#;

const CONSTANT_GENERATOR: &str = r#"#version 300 es
uniform float value;

void main() {
    output_audio_texture = vec4(value, 0.0, 0.0, 1.0);
}
"#;

const GAIN_EFFECT: &str = r#"#version 300 es
uniform float gain;
uniform float balance;

void main() {
    float sample_value = texture(stream_audio_texture, TexCoord).r;
    float channel = floor(gl_FragCoord.y);
    float b = clamp(balance, 0.0, 1.0);
    float pan = 1.0;
    if (channel < 0.5) {
        pan = min(1.0, 2.0 * (1.0 - b));
    } else if (channel < 1.5) {
        pan = min(1.0, 2.0 * b);
    }
    output_audio_texture = vec4(sample_value * gain * pan, 0.0, 0.0, 1.0);
}
"#;

const MULTITRACK_JOIN: &str = r#"#version 300 es
uniform int num_tracks;
uniform sampler2D stream_audio_texture_0;
uniform sampler2D stream_audio_texture_1;
uniform sampler2D stream_audio_texture_2;
uniform sampler2D stream_audio_texture_3;
uniform sampler2D stream_audio_texture_4;
uniform sampler2D stream_audio_texture_5;
uniform sampler2D stream_audio_texture_6;
uniform sampler2D stream_audio_texture_7;

void main() {
    float sum = texture(stream_audio_texture_0, TexCoord).r;
    if (num_tracks > 1) sum += texture(stream_audio_texture_1, TexCoord).r;
    if (num_tracks > 2) sum += texture(stream_audio_texture_2, TexCoord).r;
    if (num_tracks > 3) sum += texture(stream_audio_texture_3, TexCoord).r;
    if (num_tracks > 4) sum += texture(stream_audio_texture_4, TexCoord).r;
    if (num_tracks > 5) sum += texture(stream_audio_texture_5, TexCoord).r;
    if (num_tracks > 6) sum += texture(stream_audio_texture_6, TexCoord).r;
    if (num_tracks > 7) sum += texture(stream_audio_texture_7, TexCoord).r;
    output_audio_texture = vec4(sum, 0.0, 0.0, 1.0);
}
"#;

const AUDIO_HISTORY: &str = r#"#version 300 es
uniform sampler2D audio_history_texture;

// Sample of `channel`, `age` samples before the newest one in the history.
float history_sample(int channel, int age) {
    ivec2 size = textureSize(audio_history_texture, 0);
    int len = size.x * (size.y / num_channels);
    int s = len - 1 - age;
    if (s < 0) {
        return 0.0;
    }
    int row = s / size.x;
    ivec2 texel = ivec2(s - row * size.x, row * num_channels + channel);
    return texelFetch(audio_history_texture, texel, 0).r;
}
"#;

const ECHO_EFFECT: &str = r#"#version 300 es
uniform int num_echos;
uniform float delay;
uniform float decay;

void main() {
    int channel = int(gl_FragCoord.y);
    int age = buffer_size - 1 - int(gl_FragCoord.x);
    int spacing = int(delay * float(sample_rate) + 0.5);
    float sample_value = texture(stream_audio_texture, TexCoord).r;
    float gain = 1.0;
    for (int k = 1; k <= num_echos; k++) {
        gain *= decay;
        sample_value += gain * history_sample(channel, age + k * spacing);
    }
    output_audio_texture = vec4(sample_value, 0.0, 0.0, 1.0);
}
"#;

const FREQUENCY_FILTER_EFFECT: &str = r#"#version 300 es
uniform int num_taps;
uniform float low_pass;
uniform float high_pass;
uniform float resonance;
uniform float filter_follower;
uniform sampler2D b_coeff_texture;

void main() {
    int channel = int(gl_FragCoord.y);
    int age = buffer_size - 1 - int(gl_FragCoord.x);
    float sum = 0.0;
    for (int j = 0; j < num_taps; j++) {
        float b = texelFetch(b_coeff_texture, ivec2(j, 0), 0).r;
        sum += b * history_sample(channel, age + j);
    }
    output_audio_texture = vec4(sum, 0.0, 0.0, 1.0);
}
"#;

const TAPE_RECORD: &str = r#"#version 300 es
uniform int record_position;
uniform bool recording;

void main() {
    output_audio_texture = texture(stream_audio_texture, TexCoord);
}
"#;

const TAPE_PLAYBACK: &str = r#"#version 300 es
uniform sampler2D tape_audio_texture;

void main() {
    output_audio_texture = texture(tape_audio_texture, TexCoord);
}
"#;

const FINAL_RENDER: &str = r#"#version 300 es
void main() {
    output_audio_texture = texture(stream_audio_texture, TexCoord);
}
"#;

/// In-memory library holding every built-in shader under its path.
pub fn builtin_shaders() -> MemorySource {
    MemorySource::new()
        .with(paths::GLOBAL_SETTINGS, GLOBAL_SETTINGS)
        .with(paths::FRAG_SETTINGS, FRAG_SETTINGS)
        .with(paths::VERTEX, VERTEX)
        .with(paths::AUDIO_HISTORY, AUDIO_HISTORY)
        .with(paths::SINE_GENERATOR, SINE_GENERATOR)
        .with(paths::CONSTANT_GENERATOR, CONSTANT_GENERATOR)
        .with(paths::GAIN_EFFECT, GAIN_EFFECT)
        .with(paths::MULTITRACK_JOIN, MULTITRACK_JOIN)
        .with(paths::ECHO_EFFECT, ECHO_EFFECT)
        .with(paths::FREQUENCY_FILTER_EFFECT, FREQUENCY_FILTER_EFFECT)
        .with(paths::TAPE_RECORD, TAPE_RECORD)
        .with(paths::TAPE_PLAYBACK, TAPE_PLAYBACK)
        .with(paths::FINAL_RENDER, FINAL_RENDER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader_source::{declares_output, ShaderProgramSource};

    #[test]
    fn every_builtin_assembles_with_one_version() {
        let lib = builtin_shaders();
        for (main, imports) in [
            (paths::SINE_GENERATOR, paths::FRAG_IMPORTS),
            (paths::CONSTANT_GENERATOR, paths::FRAG_IMPORTS),
            (paths::GAIN_EFFECT, paths::FRAG_IMPORTS),
            (paths::MULTITRACK_JOIN, paths::FRAG_IMPORTS),
            (paths::ECHO_EFFECT, paths::HISTORY_IMPORTS),
            (paths::FREQUENCY_FILTER_EFFECT, paths::HISTORY_IMPORTS),
            (paths::TAPE_RECORD, paths::FRAG_IMPORTS),
            (paths::TAPE_PLAYBACK, paths::FRAG_IMPORTS),
            (paths::FINAL_RENDER, paths::FRAG_IMPORTS),
        ] {
            let program =
                ShaderProgramSource::load(&lib, &[], paths::VERTEX, imports, main).unwrap();
            assert_eq!(program.fragment.matches("#version").count(), 1, "{}", main);
            assert!(declares_output(&program.fragment, "output_audio_texture"));
        }
    }

    #[test]
    fn history_lookup_follows_the_frame_settings() {
        let lib = builtin_shaders();
        let program = ShaderProgramSource::load(
            &lib,
            &[],
            paths::VERTEX,
            paths::HISTORY_IMPORTS,
            paths::ECHO_EFFECT,
        )
        .unwrap();
        let settings = program.fragment.find("uniform int num_channels").unwrap();
        let lookup = program.fragment.find("float history_sample").unwrap();
        let main = program.fragment.find("uniform int num_echos").unwrap();
        assert!(settings < lookup && lookup < main);
    }
}
